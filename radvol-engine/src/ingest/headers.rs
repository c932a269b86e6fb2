//! Header alias resolution
//!
//! Uploads arrive with years of historical header spellings. Resolution is
//! case-insensitive and diacritic-insensitive; multiple spellings map to
//! one canonical field name.

use std::collections::HashMap;

/// Canonical field names used across the pipeline
pub mod canonical {
    pub const CLIENT: &str = "client";
    pub const PATIENT: &str = "patient";
    pub const EXAM_NAME: &str = "exam_name";
    pub const MODALITY: &str = "modality";
    pub const SPECIALTY: &str = "specialty";
    pub const CATEGORY: &str = "category";
    pub const PRIORITY: &str = "priority";
    pub const PHYSICIAN: &str = "physician";
    pub const QUANTITY: &str = "quantity";
    pub const VALUE: &str = "value";
    pub const REALIZED_DATE: &str = "realized_date";
    pub const REALIZED_TIME: &str = "realized_time";
    pub const REPORTED_DATE: &str = "reported_date";
    pub const REPORTED_TIME: &str = "reported_time";
}

/// Replace Latin-1 accented characters with their ASCII base letter
pub fn fold_diacritics(input: &str) -> String {
    input
        .chars()
        .map(|c| match c {
            'á' | 'à' | 'â' | 'ã' | 'ä' => 'a',
            'Á' | 'À' | 'Â' | 'Ã' | 'Ä' => 'A',
            'é' | 'è' | 'ê' | 'ë' => 'e',
            'É' | 'È' | 'Ê' | 'Ë' => 'E',
            'í' | 'ì' | 'î' | 'ï' => 'i',
            'Í' | 'Ì' | 'Î' | 'Ï' => 'I',
            'ó' | 'ò' | 'ô' | 'õ' | 'ö' => 'o',
            'Ó' | 'Ò' | 'Ô' | 'Õ' | 'Ö' => 'O',
            'ú' | 'ù' | 'û' | 'ü' => 'u',
            'Ú' | 'Ù' | 'Û' | 'Ü' => 'U',
            'ç' => 'c',
            'Ç' => 'C',
            'ñ' => 'n',
            'Ñ' => 'N',
            other => other,
        })
        .collect()
}

/// Lowercase, fold diacritics, and collapse interior whitespace
pub fn normalize_token(input: &str) -> String {
    fold_diacritics(input)
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Alias table mapping normalized header spellings to canonical fields
#[derive(Debug, Clone)]
pub struct HeaderAliases {
    aliases: HashMap<String, &'static str>,
}

impl Default for HeaderAliases {
    fn default() -> Self {
        use canonical::*;

        // Historical spellings observed in client uploads
        let table: &[(&str, &str)] = &[
            ("cliente", CLIENT),
            ("unidade", CLIENT),
            ("empresa", CLIENT),
            ("paciente", PATIENT),
            ("nome do paciente", PATIENT),
            ("nome paciente", PATIENT),
            ("accession", PATIENT),
            ("accession number", PATIENT),
            ("exame", EXAM_NAME),
            ("nome do exame", EXAM_NAME),
            ("descricao do exame", EXAM_NAME),
            ("descricao", EXAM_NAME),
            ("modalidade", MODALITY),
            ("especialidade", SPECIALTY),
            ("categoria", CATEGORY),
            ("prioridade", PRIORITY),
            ("carater", PRIORITY),
            ("medico", PHYSICIAN),
            ("medico laudador", PHYSICIAN),
            ("laudador", PHYSICIAN),
            ("quantidade", QUANTITY),
            ("qtd", QUANTITY),
            ("qtde", QUANTITY),
            ("valor", VALUE),
            ("valor unitario", VALUE),
            ("data realizacao", REALIZED_DATE),
            ("data de realizacao", REALIZED_DATE),
            ("data do exame", REALIZED_DATE),
            ("hora realizacao", REALIZED_TIME),
            ("hora do exame", REALIZED_TIME),
            ("data laudo", REPORTED_DATE),
            ("data do laudo", REPORTED_DATE),
            ("hora laudo", REPORTED_TIME),
            ("hora do laudo", REPORTED_TIME),
        ];

        let mut aliases = HashMap::new();
        for (spelling, field) in table {
            aliases.insert((*spelling).to_string(), *field);
        }
        Self { aliases }
    }
}

impl HeaderAliases {
    /// Resolve a raw header to its canonical field, if known
    pub fn resolve(&self, raw_header: &str) -> Option<&'static str> {
        self.aliases.get(&normalize_token(raw_header)).copied()
    }
}
