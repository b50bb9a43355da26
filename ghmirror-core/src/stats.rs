//! Report helpers over mirrored data.
//!
//! The aggregation queries themselves live on the store; this module holds
//! the EasyBuild open-PR grouping, which works on PR titles following the
//! `{class,...}[toolchain,...] summary` convention.

use std::collections::BTreeMap;

/// Parsed EasyBuild PR title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EbTitle {
    pub classes: Vec<String>,
    pub toolchains: Vec<String>,
    pub summary: String,
}

/// Parse a `{class,...}[toolchain,...] summary` title. Returns `None` for
/// titles that do not follow the convention.
pub fn parse_eb_title(title: &str) -> Option<EbTitle> {
    let rest = title.trim().strip_prefix('{')?;
    let (classes, rest) = rest.split_once('}')?;
    let rest = rest.trim_start().strip_prefix('[')?;
    let (toolchains, summary) = rest.split_once(']')?;

    let split_list = |s: &str| -> Vec<String> {
        s.split(',')
            .map(|part| part.trim().to_string())
            .filter(|part| !part.is_empty())
            .collect()
    };
    let classes = split_list(classes);
    let toolchains = split_list(toolchains);
    if classes.is_empty() || toolchains.is_empty() {
        return None;
    }
    Some(EbTitle {
        classes,
        toolchains,
        summary: summary.trim().to_string(),
    })
}

#[derive(Debug, Clone)]
pub struct EbPr {
    pub number: i64,
    pub summary: String,
}

/// Open PRs grouped toolchain -> module class -> PRs, plus the ones whose
/// titles do not follow the convention.
#[derive(Debug, Default)]
pub struct EbReport {
    pub groups: BTreeMap<String, BTreeMap<String, Vec<EbPr>>>,
    pub unclassified: Vec<EbPr>,
}

/// Group open PRs by toolchain and module class. Filters are substring
/// matches on the toolchain / class name; a PR listing several toolchains
/// or classes appears once per combination.
pub fn group_open_prs(
    prs: &[(i64, String)],
    tc_filter: Option<&str>,
    class_filter: Option<&str>,
) -> EbReport {
    let mut report = EbReport::default();
    for (number, title) in prs {
        let Some(parsed) = parse_eb_title(title) else {
            report.unclassified.push(EbPr {
                number: *number,
                summary: title.clone(),
            });
            continue;
        };
        for toolchain in &parsed.toolchains {
            if tc_filter.map(|f| !toolchain.contains(f)).unwrap_or(false) {
                continue;
            }
            for class in &parsed.classes {
                if class_filter.map(|f| !class.contains(f)).unwrap_or(false) {
                    continue;
                }
                report
                    .groups
                    .entry(toolchain.clone())
                    .or_default()
                    .entry(class.clone())
                    .or_default()
                    .push(EbPr {
                        number: *number,
                        summary: parsed.summary.clone(),
                    });
            }
        }
    }
    report
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_convention_titles() {
        let parsed = parse_eb_title("{bio,tools}[foss/2023a] BLAST+ 2.14").unwrap();
        assert_eq!(parsed.classes, vec!["bio", "tools"]);
        assert_eq!(parsed.toolchains, vec!["foss/2023a"]);
        assert_eq!(parsed.summary, "BLAST+ 2.14");

        let parsed = parse_eb_title("{lib} [GCC/12.3.0, GCC/13.2.0] zlib 1.3").unwrap();
        assert_eq!(parsed.toolchains.len(), 2);
    }

    #[test]
    fn rejects_non_convention_titles() {
        assert!(parse_eb_title("Fix typo in README").is_none());
        assert!(parse_eb_title("{bio] broken brackets").is_none());
        assert!(parse_eb_title("{}[foss/2023a] empty classes").is_none());
        assert!(parse_eb_title("{bio}[] empty toolchains").is_none());
    }

    #[test]
    fn groups_by_toolchain_then_class() {
        let prs = vec![
            (1, "{bio}[foss/2023a] BLAST+".to_string()),
            (2, "{bio,tools}[foss/2023a] HMMER".to_string()),
            (3, "{lib}[GCC/12.3.0] zlib".to_string()),
            (4, "plain title".to_string()),
        ];
        let report = group_open_prs(&prs, None, None);
        assert_eq!(report.groups.len(), 2);
        let foss = &report.groups["foss/2023a"];
        assert_eq!(foss["bio"].len(), 2);
        assert_eq!(foss["tools"].len(), 1);
        assert_eq!(report.unclassified.len(), 1);
        assert_eq!(report.unclassified[0].number, 4);
    }

    #[test]
    fn filters_are_substring_matches() {
        let prs = vec![
            (1, "{bio}[foss/2023a] BLAST+".to_string()),
            (2, "{lib}[GCC/12.3.0] zlib".to_string()),
        ];
        let report = group_open_prs(&prs, Some("foss"), None);
        assert_eq!(report.groups.len(), 1);
        assert!(report.groups.contains_key("foss/2023a"));

        let report = group_open_prs(&prs, None, Some("lib"));
        assert!(report.groups["GCC/12.3.0"].contains_key("lib"));
        assert!(!report.groups.contains_key("foss/2023a"));
    }
}
