use once_cell::sync::Lazy;

use crate::prompt::record::StructuredPrompt;

/// The closed, ordered list of prompt fields. Order is significant: it is
/// both the canonical serialization order and the editor display order.
pub const SCHEMA: [&str; 8] = [
    "subject",
    "background",
    "style",
    "lighting",
    "composition",
    "mood",
    "colorPalette",
    "negativePrompt",
];

/// Normalized labels aligned with [`SCHEMA`], precomputed once so parsing
/// does not re-derive them per line.
static NORMALIZED_LABELS: Lazy<Vec<String>> = Lazy::new(|| {
    SCHEMA
        .iter()
        .map(|identifier| normalize_label(&label_for(identifier)))
        .collect()
});

/// Derives the human-readable label for a field identifier: a space before
/// each internal uppercase boundary, the boundary char lowercased, first
/// letter capitalized. `colorPalette` becomes `Color palette`.
pub fn label_for(identifier: &str) -> String {
    let mut label = String::with_capacity(identifier.len() + 2);
    for ch in identifier.chars() {
        if ch.is_uppercase() && !label.is_empty() {
            label.push(' ');
            label.extend(ch.to_lowercase());
        } else {
            label.push(ch);
        }
    }

    let mut chars = label.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => label,
    }
}

fn normalize_label(label: &str) -> String {
    label
        .chars()
        .filter(|ch| !ch.is_whitespace())
        .flat_map(char::to_lowercase)
        .collect()
}

fn field_index_for_label(raw_label: &str) -> Option<usize> {
    let key = normalize_label(raw_label);
    if key.is_empty() {
        return None;
    }
    NORMALIZED_LABELS
        .iter()
        .position(|candidate| *candidate == key)
}

/// Parses `"Label: value"` lines into a structured record. Lines without a
/// colon and lines whose label matches no schema field are ignored; the last
/// occurrence of a duplicated label wins; fields no line mentions stay empty.
/// Syntactically this never fails: garbage input yields the all-empty record,
/// and deciding what to do with that is the caller's business.
pub fn parse_prompt_text(text: &str) -> StructuredPrompt {
    let mut record = StructuredPrompt::empty();
    for line in text.lines() {
        let Some((raw_label, raw_value)) = line.split_once(':') else {
            continue;
        };
        if let Some(index) = field_index_for_label(raw_label) {
            record.set_by_index(index, raw_value.trim().to_string());
        }
    }
    record
}

/// Renders the canonical text form: one `"Label: value"` line per schema
/// field with a non-blank value, in schema order, newline-joined with no
/// trailing newline. Empty fields vanish on the text side by design.
pub fn serialize_prompt(record: &StructuredPrompt) -> String {
    let mut lines = Vec::new();
    for (identifier, value) in record.iter() {
        if value.trim().is_empty() {
            continue;
        }
        lines.push(format!("{}: {}", label_for(identifier), value));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derives_labels_from_identifiers() {
        assert_eq!(label_for("subject"), "Subject");
        assert_eq!(label_for("colorPalette"), "Color palette");
        assert_eq!(label_for("negativePrompt"), "Negative prompt");
        assert_eq!(label_for("backgroundDetail"), "Background detail");
    }

    #[test]
    fn label_derivation_is_stable() {
        for identifier in SCHEMA {
            assert_eq!(label_for(identifier), label_for(identifier));
        }
    }

    #[test]
    fn parses_labelled_lines_into_fields() {
        let record = parse_prompt_text(
            "Subject: a red fox\nBackground: snowy forest\nIgnored line without colon\nMood: whimsical",
        );
        assert_eq!(record.get("subject"), Some("a red fox"));
        assert_eq!(record.get("background"), Some("snowy forest"));
        assert_eq!(record.get("style"), Some(""));
        assert_eq!(record.get("mood"), Some("whimsical"));
    }

    #[test]
    fn serializes_in_schema_order_skipping_empty_fields() {
        let record = StructuredPrompt::empty()
            .with_field("mood", "whimsical")
            .unwrap()
            .with_field("subject", "a red fox")
            .unwrap()
            .with_field("background", "snowy forest")
            .unwrap();
        assert_eq!(
            serialize_prompt(&record),
            "Subject: a red fox\nBackground: snowy forest\nMood: whimsical"
        );
    }

    #[test]
    fn matching_is_case_and_whitespace_insensitive() {
        let shouted = parse_prompt_text("SUBJECT:   a cat  ");
        let plain = parse_prompt_text("subject: a cat");
        assert_eq!(shouted, plain);
        assert_eq!(shouted.get("subject"), Some("a cat"));

        let spaced = parse_prompt_text("  color  palette : warm amber");
        assert_eq!(spaced.get("colorPalette"), Some("warm amber"));
    }

    #[test]
    fn last_duplicate_label_wins() {
        let record = parse_prompt_text("Subject: first\nSubject: second");
        assert_eq!(record.get("subject"), Some("second"));
    }

    #[test]
    fn unknown_labels_are_dropped_silently() {
        let record = parse_prompt_text("Unknown: value\nSubject: cat");
        assert_eq!(record.get("subject"), Some("cat"));
        assert!(SCHEMA
            .iter()
            .filter(|id| **id != "subject")
            .all(|id| record.get(id) == Some("")));
    }

    #[test]
    fn empty_input_parses_to_the_empty_record() {
        assert_eq!(parse_prompt_text(""), StructuredPrompt::empty());
    }

    #[test]
    fn colon_free_input_parses_to_the_empty_record() {
        let record = parse_prompt_text("just some prose\nacross two lines");
        assert_eq!(record, StructuredPrompt::empty());
        assert!(record.is_empty());
    }

    #[test]
    fn empty_record_serializes_to_the_empty_string() {
        assert_eq!(serialize_prompt(&StructuredPrompt::empty()), "");
    }

    #[test]
    fn serialize_then_parse_round_trips_newline_free_values() {
        let record = StructuredPrompt::empty()
            .with_field("subject", "an astronaut riding a horse")
            .unwrap()
            .with_field("lighting", "golden hour rim light")
            .unwrap()
            .with_field("colorPalette", "teal and orange")
            .unwrap()
            .with_field("negativePrompt", "blurry, watermark, text")
            .unwrap();
        assert_eq!(parse_prompt_text(&serialize_prompt(&record)), record);
    }

    #[test]
    fn parse_then_serialize_is_lossy_for_unmatched_lines() {
        let text = "Subject: cat\nSome trailing commentary";
        assert_eq!(
            serialize_prompt(&parse_prompt_text(text)),
            "Subject: cat"
        );
    }

    #[test]
    fn embedded_label_lines_inside_a_value_do_not_round_trip() {
        // Known limitation: the serializer has no escaping, so a value that
        // itself contains a "Label: " line is re-read as that field.
        let record = StructuredPrompt::empty()
            .with_field("subject", "a fox\nMood: sly")
            .unwrap();
        let reparsed = parse_prompt_text(&serialize_prompt(&record));
        assert_ne!(reparsed, record);
        assert_eq!(reparsed.get("subject"), Some("a fox"));
        assert_eq!(reparsed.get("mood"), Some("sly"));
    }
}
