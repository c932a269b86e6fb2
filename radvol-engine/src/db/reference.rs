//! Reference table loading
//!
//! Loads the read-only reference tables once per batch into a
//! `ReferenceData` value passed by reference into the rule engine.
//! Replaces the legacy pattern of ad-hoc lookup caches built as global
//! state; nothing here is shared mutably across concurrent batches.

use radvol_common::Result;
use sqlx::{Row, SqlitePool};

use crate::models::{BillingWindow, ExamBreakRule, ExamRegistryEntry, PriceTier, ReferenceData};

/// Load all reference tables for one batch run
pub async fn load_reference_data(
    pool: &SqlitePool,
    billing_window: BillingWindow,
) -> Result<ReferenceData> {
    let mut data = ReferenceData {
        billing_window: Some(billing_window),
        ..Default::default()
    };

    let rows = sqlx::query("SELECT exam_name, reference_value FROM depara_mappings")
        .fetch_all(pool)
        .await?;
    for row in rows {
        data.depara
            .insert(row.get("exam_name"), row.get("reference_value"));
    }

    let rows = sqlx::query(
        "SELECT source_exam, derived_suffix, target_category, value_share FROM exam_break_rules",
    )
    .fetch_all(pool)
    .await?;
    for row in rows {
        let rule = ExamBreakRule {
            source_exam: row.get("source_exam"),
            derived_suffix: row.get("derived_suffix"),
            target_category: row.get("target_category"),
            value_share: row.get("value_share"),
        };
        data.break_rules
            .entry(rule.source_exam.clone())
            .or_default()
            .push(rule);
    }

    let rows = sqlx::query("SELECT exam_name, specialty, category FROM exam_registry")
        .fetch_all(pool)
        .await?;
    for row in rows {
        let entry = ExamRegistryEntry {
            exam_name: row.get("exam_name"),
            specialty: row.get("specialty"),
            category: row.get("category"),
        };
        data.registry.insert(entry.exam_name.clone(), entry);
    }

    let rows = sqlx::query("SELECT physician_normalized, specialty FROM physician_roster")
        .fetch_all(pool)
        .await?;
    for row in rows {
        data.roster
            .insert(row.get("physician_normalized"), row.get("specialty"));
    }

    tracing::debug!(
        depara = data.depara.len(),
        break_rules = data.break_rules.len(),
        registry = data.registry.len(),
        roster = data.roster.len(),
        "Reference data loaded"
    );

    Ok(data)
}

/// Load every price tier for a client, feeding the pricing resolver
pub async fn load_price_tiers(pool: &SqlitePool, client: &str) -> Result<Vec<PriceTier>> {
    let rows = sqlx::query(
        r#"
        SELECT id, client, modality, specialty, category, priority,
               volume_from, volume_to, base_price, urgency_price
        FROM price_tiers
        WHERE client = ?
        ORDER BY id
        "#,
    )
    .bind(client)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| PriceTier {
            id: row.get("id"),
            client: row.get("client"),
            modality: row.get("modality"),
            specialty: row.get("specialty"),
            category: row.get("category"),
            priority: row.get("priority"),
            volume_from: row.get("volume_from"),
            volume_to: row.get("volume_to"),
            base_price: row.get("base_price"),
            urgency_price: row.get("urgency_price"),
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use radvol_common::db::create_schema;

    #[tokio::test]
    async fn loads_all_tables_into_lookup_maps() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_schema(&pool).await.unwrap();

        sqlx::query("INSERT INTO depara_mappings (exam_name, reference_value) VALUES ('CRANIO', 18.0)")
            .execute(&pool)
            .await
            .unwrap();
        sqlx::query(
            "INSERT INTO exam_break_rules (source_exam, derived_suffix, target_category, value_share)
             VALUES ('ANGIO RM', 'base', 'RM', 0.6), ('ANGIO RM', 'contraste', 'RM CONTRASTE', 0.4)",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO exam_registry (exam_name, specialty, category) VALUES ('CRANIO', 'TOMOGRAFIA', 'TC')",
        )
        .execute(&pool)
        .await
        .unwrap();
        sqlx::query(
            "INSERT INTO physician_roster (physician_normalized, specialty) VALUES ('joao souza', 'NEURO')",
        )
        .execute(&pool)
        .await
        .unwrap();

        let window = BillingWindow::for_month(NaiveDate::from_ymd_opt(2024, 1, 15).unwrap());
        let data = load_reference_data(&pool, window).await.unwrap();

        assert_eq!(data.depara.get("CRANIO"), Some(&18.0));
        assert_eq!(data.break_rules.get("ANGIO RM").unwrap().len(), 2);
        assert_eq!(data.registry.get("CRANIO").unwrap().category, "TC");
        assert_eq!(data.roster.get("joao souza").unwrap(), "NEURO");
        assert_eq!(data.billing_window, Some(window));
    }

    #[tokio::test]
    async fn price_tiers_filtered_by_client() {
        let pool = SqlitePool::connect(":memory:").await.unwrap();
        create_schema(&pool).await.unwrap();

        sqlx::query(
            r#"
            INSERT INTO price_tiers
                (client, modality, specialty, category, priority,
                 volume_from, volume_to, base_price, urgency_price)
            VALUES
                ('HOSP', 'CR', 'RAIO-X', 'GERAL', 'ROTINA', 0, 1000, 9.5, 14.0),
                ('OUTRO', 'CR', 'RAIO-X', 'GERAL', 'ROTINA', 0, 1000, 8.0, 12.0)
            "#,
        )
        .execute(&pool)
        .await
        .unwrap();

        let tiers = load_price_tiers(&pool, "HOSP").await.unwrap();
        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].base_price, 9.5);
    }
}
