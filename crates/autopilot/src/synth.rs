//! Draft synthesizer (spec.md §4.8): turns the explorer's flat dimension
//! set and state graph into a [`DraftCatalog`] — sections grouped by
//! first-appearance order, geo-template extraction for region-repeated
//! sections, and per-dimension projection into the draft shape.

use std::collections::HashMap;

use crate::explorer::StateTracker;
use crate::model::{
    clean_key, Dimension, DraftCatalog, DraftSection, EnteredVia, ExplorationMeta, GateControl,
    GeoRegion, GeoSections, UiMapping,
};

/// Region keywords recognized for geo-template collapsing (spec.md §4.8's
/// closed list). Matches either a bare region name or a parenthesized
/// qualifier, e.g. "US East (N. Virginia)".
const REGION_KEYWORDS: &[&str] = &[
    "United States",
    "US ",
    "Canada",
    "Asia Pacific",
    "Europe",
    "Africa",
    "Middle East",
    "South America",
    "Australia",
    "India",
    "Japan",
    "Global",
];

fn looks_like_region_heading(section: &str) -> bool {
    REGION_KEYWORDS.iter().any(|kw| section.contains(kw)) || section.contains('(')
}

/// Ranks a state id for "lowest Sᵢ" comparisons: numbered ids (`S0`, `S1`,
/// ..., `S10`) sort numerically rather than lexicographically (`S10` would
/// otherwise sort before `S2`); anything that doesn't parse falls back to
/// lexicographic order after every numbered id.
fn state_rank(state_id: &str) -> (u64, &str) {
    match state_id.strip_prefix('S').and_then(|rest| rest.parse::<u64>().ok()) {
        Some(n) => (n, ""),
        None => (u64::MAX, state_id),
    }
}

/// Builds the ordered list of draft sections: one per distinct `section`
/// attribute value, in first-appearance order, keyed uniquely with an
/// `unknown_section` sentinel suffix on collision. Each section's
/// `state_id` is the lowest Sᵢ among its member dimensions (spec.md §4.8).
fn build_sections(dimensions: &[Dimension], states: &[crate::model::State]) -> Vec<DraftSection> {
    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, Vec<Dimension>> = HashMap::new();

    for dim in dimensions {
        let key = dim.section.clone();
        if !grouped.contains_key(&key) {
            order.push(key.clone());
        }
        grouped.entry(key).or_default().push(dim.clone());
    }

    let mut seen_keys: HashMap<String, u32> = HashMap::new();
    let mut sections = Vec::with_capacity(order.len());

    for section in order {
        let dims = grouped.remove(&section).unwrap_or_default();
        let base_key = clean_key(&section);
        let base_key = if base_key == crate::model::UNKNOWN || base_key.is_empty() {
            "unknown_section".to_string()
        } else {
            base_key
        };
        let count = seen_keys.entry(base_key.clone()).or_insert(0);
        let key = if *count == 0 {
            base_key.clone()
        } else {
            format!("{base_key}_{count}")
        };
        *count += 1;

        let state_id = dims
            .iter()
            .map(|d| d.discovered_in_state.as_str())
            .min_by_key(|id| state_rank(id))
            .unwrap_or("S0")
            .to_string();

        let entered_via = states
            .iter()
            .find(|s| s.state_id == state_id)
            .map(|s| s.entered_via.clone())
            .unwrap_or_else(EnteredVia::root);

        sections.push(DraftSection {
            key,
            label: section,
            state_id,
            entered_via,
            dimensions: dims,
        });
    }

    sections
}

/// Collapses region-repeated sections into a `geo_sections` template: when
/// two or more sections share both a region-looking heading and an
/// identical `(key, field_type)` signature across their dimensions, they
/// are pulled out of `sections` and represented once plus a `regions` list.
fn extract_geo_sections(sections: &mut Vec<DraftSection>) -> Option<GeoSections> {
    let mut signature_groups: HashMap<Vec<(String, crate::model::FieldType)>, Vec<usize>> = HashMap::new();

    for (i, section) in sections.iter().enumerate() {
        if !looks_like_region_heading(&section.label) || section.dimensions.len() < 2 {
            continue;
        }
        let signature: Vec<(String, crate::model::FieldType)> =
            section.dimensions.iter().map(|d| (d.key.clone(), d.field_type)).collect();
        signature_groups.entry(signature).or_default().push(i);
    }

    let (_, indices) = signature_groups.into_iter().max_by_key(|(_, v)| v.len())?;
    if indices.len() < 2 {
        return None;
    }

    let template_dimensions = sections[indices[0]].dimensions.clone();
    let regions: Vec<GeoRegion> = indices
        .iter()
        .map(|&i| GeoRegion {
            key: clean_key(&sections[i].label),
            label: sections[i].label.clone(),
            aws_section_heading: sections[i].label.clone(),
        })
        .collect();

    let mut keep = sections.clone();
    let mut idx_set: std::collections::HashSet<usize> = indices.into_iter().collect();
    let mut out = Vec::with_capacity(keep.len());
    for (i, s) in keep.drain(..).enumerate() {
        if !idx_set.remove(&i) {
            out.push(s);
        }
    }
    *sections = out;

    Some(GeoSections {
        template_dimensions,
        regions,
    })
}

pub struct SynthInput {
    pub service_id: String,
    pub source_url: String,
    pub ui_mapping: UiMapping,
    pub gate_controls: Vec<GateControl>,
    pub region_used: Option<String>,
    pub generated_at: String,
}

/// Builds the final draft catalog from the explorer's output.
pub fn synthesize(input: SynthInput, tracker: &StateTracker, dimensions: Vec<Dimension>) -> DraftCatalog {
    let mut sections = build_sections(&dimensions, &tracker.states);
    let geo_sections = extract_geo_sections(&mut sections);

    let exploration_meta = ExplorationMeta {
        activated_toggles: tracker.activated_toggles.clone(),
        exploration_states: tracker.states.len() as u32,
        exploration_budget_hit: tracker.budget_hit,
        screenshots: Vec::new(),
    };

    DraftCatalog {
        service_id: input.service_id,
        schema_version: DraftCatalog::SCHEMA_VERSION.to_string(),
        generated_at: input.generated_at,
        source: input.source_url,
        region_used: input.region_used,
        ui_mapping: input.ui_mapping,
        gate_controls: input.gate_controls,
        sections,
        geo_sections,
        exploration_meta: Some(exploration_meta),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Confidence, DimensionStatus, FieldType, LabelSource, State};

    fn dim(key: &str, section: &str, state_id: &str, field_type: FieldType) -> Dimension {
        Dimension {
            key: key.to_string(),
            label_visible: key.to_string(),
            aria_label: Some(key.to_string()),
            field_type,
            section: section.to_string(),
            css_selector: format!("#{key}"),
            options: Vec::new(),
            default_value: None,
            unit: None,
            unit_sibling: None,
            required: false,
            pattern_type: None,
            label_source: LabelSource::AriaLabel,
            confidence: Confidence::new(1.0, 1.0, 1.0),
            status: DimensionStatus::Ok,
            discovered_in_state: state_id.to_string(),
            disambiguation_index: None,
            semantic_role: None,
            row_fields: None,
            add_button_label: None,
            review_note: None,
        }
    }

    #[test]
    fn sections_preserve_first_appearance_order() {
        let dims = vec![
            dim("Storage", "Storage config", "S0", FieldType::Number),
            dim("Instance", "Compute config", "S0", FieldType::Text),
            dim("Instance Count", "Compute config", "S0", FieldType::Number),
        ];
        let states = vec![State {
            state_id: "S0".into(),
            entered_via: EnteredVia::root(),
            fingerprint: "abc".into(),
            sequence: vec![],
        }];
        let sections = build_sections(&dims, &states);
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].label, "Storage config");
        assert_eq!(sections[1].dimensions.len(), 2);
    }

    #[test]
    fn sections_group_by_section_alone_across_discovery_states() {
        let dims = vec![
            dim("Storage Size", "Storage", "S0", FieldType::Number),
            dim("Storage Encrypted", "Storage", "S1", FieldType::Toggle),
        ];
        let states = vec![
            State {
                state_id: "S0".into(),
                entered_via: EnteredVia::root(),
                fingerprint: "abc".into(),
                sequence: vec![],
            },
            State {
                state_id: "S1".into(),
                entered_via: EnteredVia {
                    gate_control: Some("Enable encryption".into()),
                    action: Some("click".into()),
                    from_state: Some("S0".into()),
                },
                fingerprint: "def".into(),
                sequence: vec!["click".into()],
            },
        ];

        let sections = build_sections(&dims, &states);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].key, "Storage");
        assert_eq!(sections[0].state_id, "S0");
        assert_eq!(sections[0].dimensions.len(), 2);
    }

    #[test]
    fn section_state_id_picks_lowest_numbered_state_not_lexicographic() {
        let dims = vec![
            dim("Field A", "Advanced", "S10", FieldType::Text),
            dim("Field B", "Advanced", "S2", FieldType::Text),
        ];
        let states: Vec<State> = Vec::new();
        let sections = build_sections(&dims, &states);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].state_id, "S2");
    }

    #[test]
    fn geo_sections_collapse_matching_region_headings() {
        let mut sections = vec![
            DraftSection {
                key: "us_east".into(),
                label: "US East (N. Virginia)".into(),
                state_id: "S0".into(),
                entered_via: EnteredVia::root(),
                dimensions: vec![
                    dim("On-Demand Hours", "US East (N. Virginia)", "S0", FieldType::Number),
                    dim("Reserved Term", "US East (N. Virginia)", "S0", FieldType::Select),
                ],
            },
            DraftSection {
                key: "us_west".into(),
                label: "US West (Oregon)".into(),
                state_id: "S0".into(),
                entered_via: EnteredVia::root(),
                dimensions: vec![
                    dim("On-Demand Hours", "US West (Oregon)", "S0", FieldType::Number),
                    dim("Reserved Term", "US West (Oregon)", "S0", FieldType::Select),
                ],
            },
            DraftSection {
                key: "compute".into(),
                label: "Compute configuration".into(),
                state_id: "S0".into(),
                entered_via: EnteredVia::root(),
                dimensions: vec![dim("Instance Type", "Compute configuration", "S0", FieldType::Select)],
            },
        ];

        let geo = extract_geo_sections(&mut sections).unwrap();
        assert_eq!(geo.regions.len(), 2);
        assert_eq!(geo.template_dimensions.len(), 2);
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].label, "Compute configuration");
    }

    #[test]
    fn bare_region_headings_without_parens_are_recognized() {
        for label in ["Japan", "Australia", "India", "Global", "US East"] {
            assert!(looks_like_region_heading(label), "{label} should match");
        }
        assert!(!looks_like_region_heading("Compute configuration"));
    }
}
