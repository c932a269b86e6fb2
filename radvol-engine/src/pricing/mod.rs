//! Tiered pricing resolver
//!
//! Resolves a unit price for a grouped exam volume from the client's
//! price tiers. A missing tier is an explicit `NoPriceFound`, never a
//! zero price: callers must branch on the result instead of summing an
//! absent price as currency zero.

use serde::Serialize;

use crate::ingest::normalize_token;
use crate::models::PriceTier;

/// Priorities billed at the tier's urgency price
const URGENT_PRIORITY_TOKENS: &[&str] = &["plantao", "urgente", "urgencia"];

/// Result of one price lookup
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum PriceResolution {
    Priced {
        unit_price: f64,
        tier_id: i64,
        urgency_applied: bool,
    },
    NoPriceFound,
}

/// Does this priority select the urgency price?
pub fn is_urgent_priority(priority: &str) -> bool {
    let folded = normalize_token(priority);
    URGENT_PRIORITY_TOKENS.contains(&folded.as_str())
}

fn tier_field_matches(tier_value: &str, requested: &str) -> bool {
    normalize_token(tier_value) == normalize_token(requested)
}

/// Resolve the unit price for one dimension tuple and tier volume.
///
/// Tiers matching all five dimensions are filtered to those whose
/// `[volume_from, volume_to]` range contains `volume_for_tier`; the
/// lowest-id survivor wins. Urgent priorities take the urgency price.
pub fn resolve_price(
    tiers: &[PriceTier],
    client: &str,
    modality: &str,
    specialty: &str,
    category: &str,
    priority: &str,
    volume_for_tier: i64,
) -> PriceResolution {
    let urgent = is_urgent_priority(priority);

    let matched = tiers
        .iter()
        .filter(|tier| {
            tier_field_matches(&tier.client, client)
                && tier_field_matches(&tier.modality, modality)
                && tier_field_matches(&tier.specialty, specialty)
                && tier_field_matches(&tier.category, category)
                && tier_field_matches(&tier.priority, priority)
        })
        .filter(|tier| (tier.volume_from..=tier.volume_to).contains(&volume_for_tier))
        .min_by_key(|tier| tier.id);

    match matched {
        Some(tier) => PriceResolution::Priced {
            unit_price: if urgent { tier.urgency_price } else { tier.base_price },
            tier_id: tier.id,
            urgency_applied: urgent,
        },
        None => PriceResolution::NoPriceFound,
    }
}

/// One group that could not be priced
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UnpricedGroup {
    pub modality: String,
    pub specialty: String,
    pub category: String,
    pub priority: String,
    pub quantity: i64,
}

/// Priced total plus the groups the tier table could not cover.
///
/// `total` covers only the priced groups; a non-empty `unpriced` list is
/// the explicit flag that the total is partial.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PricingSummary {
    pub total: f64,
    pub priced_groups: u64,
    pub unpriced: Vec<UnpricedGroup>,
}

/// Price a set of grouped quantities for one client.
///
/// Each entry is ((modality, specialty, category, priority), quantity);
/// the group's own quantity is the tier volume.
pub fn summarize(
    tiers: &[PriceTier],
    client: &str,
    groups: &[((String, String, String, String), i64)],
) -> PricingSummary {
    let mut summary = PricingSummary::default();

    for ((modality, specialty, category, priority), quantity) in groups {
        match resolve_price(tiers, client, modality, specialty, category, priority, *quantity) {
            PriceResolution::Priced { unit_price, .. } => {
                summary.total += unit_price * *quantity as f64;
                summary.priced_groups += 1;
            }
            PriceResolution::NoPriceFound => summary.unpriced.push(UnpricedGroup {
                modality: modality.clone(),
                specialty: specialty.clone(),
                category: category.clone(),
                priority: priority.clone(),
                quantity: *quantity,
            }),
        }
    }

    summary
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tier(id: i64, priority: &str, from: i64, to: i64, base: f64, urgency: f64) -> PriceTier {
        PriceTier {
            id,
            client: "HOSP".into(),
            modality: "CR".into(),
            specialty: "RAIO-X".into(),
            category: "GERAL".into(),
            priority: priority.into(),
            volume_from: from,
            volume_to: to,
            base_price: base,
            urgency_price: urgency,
        }
    }

    #[test]
    fn volume_selects_the_containing_tier() {
        let tiers = [
            tier(1, "ROTINA", 0, 100, 12.0, 18.0),
            tier(2, "ROTINA", 101, 10_000, 9.5, 14.0),
        ];

        let low = resolve_price(&tiers, "HOSP", "CR", "RAIO-X", "GERAL", "ROTINA", 50);
        let high = resolve_price(&tiers, "HOSP", "CR", "RAIO-X", "GERAL", "ROTINA", 500);

        assert_eq!(
            low,
            PriceResolution::Priced { unit_price: 12.0, tier_id: 1, urgency_applied: false }
        );
        assert_eq!(
            high,
            PriceResolution::Priced { unit_price: 9.5, tier_id: 2, urgency_applied: false }
        );
    }

    #[test]
    fn urgent_priority_takes_urgency_price() {
        let tiers = [tier(1, "PLANTÃO", 0, 1000, 12.0, 18.0)];
        let result = resolve_price(&tiers, "HOSP", "CR", "RAIO-X", "GERAL", "Plantão", 10);
        assert_eq!(
            result,
            PriceResolution::Priced { unit_price: 18.0, tier_id: 1, urgency_applied: true }
        );
    }

    #[test]
    fn no_matching_tier_is_explicit_not_zero() {
        let tiers = [tier(1, "ROTINA", 0, 100, 12.0, 18.0)];

        let wrong_volume = resolve_price(&tiers, "HOSP", "CR", "RAIO-X", "GERAL", "ROTINA", 500);
        assert_eq!(wrong_volume, PriceResolution::NoPriceFound);

        let wrong_client = resolve_price(&tiers, "OUTRO", "CR", "RAIO-X", "GERAL", "ROTINA", 10);
        assert_eq!(wrong_client, PriceResolution::NoPriceFound);
    }

    #[test]
    fn tier_matching_ignores_case_and_accents() {
        let tiers = [tier(1, "Rotina", 0, 100, 12.0, 18.0)];
        let result = resolve_price(&tiers, "hosp", "cr", "raio-x", "geral", "ROTINA", 10);
        assert!(matches!(result, PriceResolution::Priced { .. }));
    }

    #[test]
    fn summary_separates_priced_total_from_unpriced_groups() {
        let tiers = [tier(1, "ROTINA", 0, 1000, 10.0, 15.0)];
        let groups = vec![
            (("CR".to_string(), "RAIO-X".to_string(), "GERAL".to_string(), "ROTINA".to_string()), 5),
            (("RM".to_string(), "RESSONANCIA".to_string(), "GERAL".to_string(), "ROTINA".to_string()), 3),
        ];

        let summary = summarize(&tiers, "HOSP", &groups);
        assert_eq!(summary.total, 50.0);
        assert_eq!(summary.priced_groups, 1);
        assert_eq!(summary.unpriced.len(), 1);
        assert_eq!(summary.unpriced[0].modality, "RM");
        assert_eq!(summary.unpriced[0].quantity, 3);
    }
}
