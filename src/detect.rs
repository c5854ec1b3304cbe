//! Column-role detection over unknown schemas.
//!
//! Boundary files and survey exports name their identifier columns after
//! whichever institution produced them. Detection is a ranked keyword scan:
//! candidates are tried most-specific first, each against every column in
//! original order, and the first containment hit wins. New naming conventions
//! are added by extending the candidate tables.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnRole {
    Code,
    Name,
}

pub const CODE_CANDIDATES: &[&str] = &[
    "municipio_cod",
    "codigo_ibge",
    "cod_ibge",
    "cod_mun",
    "cd_mun",
    "cd_municip",
    "cd_ibge",
    "codigo",
    "ibge",
    "cod",
];

pub const NAME_CANDIDATES: &[&str] = &[
    "municipio_nome",
    "nome",
    "municipio",
    "nm_mun",
    "nm_municip",
    "name",
];

impl ColumnRole {
    pub fn candidates(self) -> &'static [&'static str] {
        match self {
            ColumnRole::Code => CODE_CANDIDATES,
            ColumnRole::Name => NAME_CANDIDATES,
        }
    }
}

/// Returns the column best matching `role`, or `None` when nothing matches.
pub fn detect_column<S: AsRef<str>>(columns: &[S], role: ColumnRole) -> Option<&str> {
    detect_column_excluding(columns, role, &[])
}

/// Same as [`detect_column`] but never returns a column listed in `exclude`.
pub fn detect_column_excluding<'a, S: AsRef<str>>(
    columns: &'a [S],
    role: ColumnRole,
    exclude: &[&str],
) -> Option<&'a str> {
    let lowered = columns
        .iter()
        .map(|c| c.as_ref().to_lowercase())
        .collect::<Vec<_>>();
    for candidate in role.candidates() {
        for (idx, name) in lowered.iter().enumerate() {
            let original = columns[idx].as_ref();
            if name.contains(candidate) && !exclude.contains(&original) {
                return Some(original);
            }
        }
    }
    None
}

/// Prefers an exact, well-known column name and falls back to detection.
pub fn resolve_column<'a, S: AsRef<str>>(
    columns: &'a [S],
    preferred: &str,
    role: ColumnRole,
    exclude: &[&str],
) -> Option<&'a str> {
    columns
        .iter()
        .map(AsRef::as_ref)
        .find(|c| *c == preferred && !exclude.contains(c))
        .or_else(|| detect_column_excluding(columns, role, exclude))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_priority_beats_column_order() {
        let columns = ["ID", "CD_MUN", "CODIGO_IBGE"];
        assert_eq!(detect_column(&columns, ColumnRole::Code), Some("CODIGO_IBGE"));
    }

    #[test]
    fn column_order_breaks_ties_within_a_candidate() {
        let columns = ["cod_uf", "cod_regiao"];
        assert_eq!(detect_column(&columns, ColumnRole::Code), Some("cod_uf"));
    }

    #[test]
    fn matching_is_case_insensitive_substring() {
        let columns = ["geocodigo", "NM_MUNICIP"];
        assert_eq!(detect_column(&columns, ColumnRole::Code), Some("geocodigo"));
        assert_eq!(detect_column(&columns, ColumnRole::Name), Some("NM_MUNICIP"));
    }

    #[test]
    fn no_match_is_none() {
        let columns = ["ano", "feminicidios"];
        assert_eq!(detect_column(&columns, ColumnRole::Code), None);
        assert_eq!(detect_column(&columns, ColumnRole::Name), None);
        let empty: [&str; 0] = [];
        assert_eq!(detect_column(&empty, ColumnRole::Name), None);
    }

    #[test]
    fn exclusion_skips_an_already_claimed_column() {
        let columns = ["municipio_cod", "ano"];
        assert_eq!(detect_column(&columns, ColumnRole::Name), Some("municipio_cod"));
        assert_eq!(
            detect_column_excluding(&columns, ColumnRole::Name, &["municipio_cod"]),
            None
        );
    }

    #[test]
    fn resolve_prefers_exact_name() {
        let columns = vec!["cd_mun".to_string(), "cod_ibge".to_string()];
        assert_eq!(
            resolve_column(&columns, "cd_mun", ColumnRole::Code, &[]),
            Some("cd_mun")
        );
        assert_eq!(
            resolve_column(&columns, "missing", ColumnRole::Code, &[]),
            Some("cod_ibge")
        );
    }
}
