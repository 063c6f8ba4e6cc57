//! Rendering of human-readable codes.
//!
//! All codes share the shape `prefix + two-digit year + "-" + value`;
//! unit codes display the department code without a year, although the
//! backing counter is still year-scoped.

/// Known disease-name fragments and their report prefixes.
const DISEASE_PREFIXES: &[(&str, &str)] = &[
    ("water", "Water"),
    ("culture", "CU"),
    ("fungi", "Fungi"),
    ("salmonella", "Salm"),
    ("total count", "Count"),
    ("count", "Count"),
    ("ast", "AST"),
];

/// Renders a sample code, e.g. `SMP25-42`.
pub fn sample_code(year: i32, value: u64) -> String {
    format!("SMP{:02}-{}", year.rem_euclid(100), value)
}

/// Renders a unit code, e.g. `PCR-17`.
pub fn unit_code(department_code: &str, value: u64) -> String {
    format!("{}-{}", department_code, value)
}

/// Renders a disease report number, e.g. `Salm25-3`.
pub fn report_number(prefix: &str, year: i32, value: u64) -> String {
    format!("{}{:02}-{}", prefix, year.rem_euclid(100), value)
}

/// Derives the report prefix for a free-text disease name.
///
/// Case-insensitive substring lookup against the fragment table; when
/// several fragments match, the longest one wins. Unknown names fall back
/// to their first four characters, upper-cased.
pub fn disease_prefix(name: &str) -> String {
    let lower = name.to_lowercase();

    let mut best: Option<(&str, &str)> = None;
    for (fragment, prefix) in DISEASE_PREFIXES.iter().copied() {
        if !lower.contains(fragment) {
            continue;
        }
        match best {
            Some((current, _)) if current.len() >= fragment.len() => {}
            _ => best = Some((fragment, prefix)),
        }
    }

    match best {
        Some((_, prefix)) => prefix.to_string(),
        None => name.chars().take(4).collect::<String>().to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_code_uses_two_digit_year() {
        assert_eq!(sample_code(2025, 42), "SMP25-42");
        assert_eq!(sample_code(2030, 1), "SMP30-1");
    }

    #[test]
    fn unit_code_omits_year() {
        assert_eq!(unit_code("PCR", 17), "PCR-17");
        assert_eq!(unit_code("SER", 1), "SER-1");
    }

    #[test]
    fn report_number_combines_prefix_year_value() {
        assert_eq!(report_number("Salm", 2025, 3), "Salm25-3");
    }

    #[test]
    fn known_diseases_resolve_from_table() {
        assert_eq!(disease_prefix("Salmonella"), "Salm");
        assert_eq!(disease_prefix("Fungal culture"), "CU");
        assert_eq!(disease_prefix("Fungi"), "Fungi");
        assert_eq!(disease_prefix("Total Count"), "Count");
        assert_eq!(disease_prefix("water quality"), "Water");
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert_eq!(disease_prefix("SALMONELLA ENTERITIDIS"), "Salm");
        assert_eq!(disease_prefix("aSt panel"), "AST");
    }

    #[test]
    fn longest_fragment_wins() {
        // Contains both "salmonella" (10) and "culture" (7).
        assert_eq!(disease_prefix("Salmonella culture"), "Salm");
        // "total count" (11) beats "count" (5); both map to Count anyway.
        assert_eq!(disease_prefix("Total count plate"), "Count");
    }

    #[test]
    fn unknown_disease_falls_back_to_first_four_upper() {
        assert_eq!(disease_prefix("Xyzabc"), "XYZA");
        assert_eq!(disease_prefix("Newcastle"), "NEWC");
    }

    #[test]
    fn short_names_keep_their_length() {
        assert_eq!(disease_prefix("TB"), "TB");
    }
}
