use crate::types::{ExtractedFields, FieldName, MismatchRecord, ReferenceIdentity};

const DATE_FIELDS: [FieldName; 2] = [FieldName::Dob, FieldName::Doa];

/// Compare extracted dates with the matched roster entry.
///
/// A record is emitted only when both sides have a value and the canonical
/// strings differ. A missing side is not a mismatch.
pub fn detect_mismatches(fields: &ExtractedFields, reference: &ReferenceIdentity) -> Vec<MismatchRecord> {
    DATE_FIELDS
        .iter()
        .filter_map(|&field| {
            let expected = reference.canonical_date(field)?;
            let extracted = fields.get(&field)?;
            let observed = extracted.normalized_value.trim();
            if observed.is_empty() || observed == expected {
                return None;
            }
            Some(MismatchRecord {
                field,
                expected_value: expected,
                observed_value: observed.to_string(),
                page_number: extracted.page_number.max(1),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ExtractedField;
    use chrono::NaiveDate;

    fn reference(dob: Option<(i32, u32, u32)>, doa: Option<(i32, u32, u32)>) -> ReferenceIdentity {
        let date = |t: (i32, u32, u32)| NaiveDate::from_ymd_opt(t.0, t.1, t.2);
        ReferenceIdentity {
            id: 1,
            name: "Jane Doe".into(),
            date_of_birth: dob.and_then(date),
            date_of_accident: doa.and_then(date),
        }
    }

    fn field(name: FieldName, value: &str, page: u32) -> (FieldName, ExtractedField) {
        (
            name,
            ExtractedField {
                field_name: name,
                raw_value: value.into(),
                normalized_value: value.into(),
                confidence: 0.9,
                page_number: page,
            },
        )
    }

    #[test]
    fn differing_dob_is_flagged() {
        let fields: ExtractedFields = [field(FieldName::Dob, "01/02/1990", 3)].into_iter().collect();
        let records = detect_mismatches(&fields, &reference(Some((1990, 2, 1)), None));
        assert_eq!(
            records,
            vec![MismatchRecord {
                field: FieldName::Dob,
                expected_value: "02/01/1990".into(),
                observed_value: "01/02/1990".into(),
                page_number: 3,
            }]
        );
    }

    #[test]
    fn absent_extraction_is_not_a_mismatch() {
        let fields = ExtractedFields::new();
        assert!(detect_mismatches(&fields, &reference(Some((1990, 2, 1)), None)).is_empty());
    }

    #[test]
    fn absent_reference_date_is_not_a_mismatch() {
        let fields: ExtractedFields = [field(FieldName::Doa, "03/04/2020", 1)].into_iter().collect();
        assert!(detect_mismatches(&fields, &reference(Some((1990, 1, 2)), None)).is_empty());
    }

    #[test]
    fn equal_dates_are_not_flagged() {
        let fields: ExtractedFields = [
            field(FieldName::Dob, "01/02/1990", 1),
            field(FieldName::Doa, "03/04/2020", 2),
        ]
        .into_iter()
        .collect();
        let records = detect_mismatches(&fields, &reference(Some((1990, 1, 2)), Some((2020, 3, 4))));
        assert!(records.is_empty());
    }

    #[test]
    fn unparsed_extraction_compares_as_text() {
        let fields: ExtractedFields = [field(FieldName::Doa, "spring 2020", 2)].into_iter().collect();
        let records = detect_mismatches(&fields, &reference(None, Some((2020, 3, 4))));
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].field, FieldName::Doa);
        assert_eq!(records[0].observed_value, "spring 2020");
    }
}
