/// Canonical column vocabulary for the roster and schedule sheets.
///
/// Uploaded workbooks spell these headers a dozen different ways across
/// years and uploaders; everything downstream works in terms of these tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CanonicalHeader {
    GroupNo,
    RollNo,
    StudentName,
    Contact,
    Domain,
    Title,
    Sponsor,
    Guide,
    Track,
    PanelName,
    GroupId,
    Location,
}

impl CanonicalHeader {
    pub fn label(self) -> &'static str {
        match self {
            CanonicalHeader::GroupNo => "Group No.",
            CanonicalHeader::RollNo => "Roll No.",
            CanonicalHeader::StudentName => "Name of the group member",
            CanonicalHeader::Contact => "Contact details",
            CanonicalHeader::Domain => "Project Domain",
            CanonicalHeader::Title => "Title of the Project",
            CanonicalHeader::Sponsor => "Name of the sponsored company",
            CanonicalHeader::Guide => "Name of the Guide",
            CanonicalHeader::Track => "Track",
            CanonicalHeader::PanelName => "Name of the Panel",
            CanonicalHeader::GroupId => "Group ID",
            CanonicalHeader::Location => "Location",
        }
    }
}

/// One first-match-wins dispatch rule: the cleaned header must contain at
/// least one `any` fragment and none of the `none` fragments.
struct HeaderRule {
    tag: CanonicalHeader,
    any: &'static [&'static str],
    none: &'static [&'static str],
}

/// Ordered rule table. Order matters: e.g. "Name of the Guide" must be
/// suppressed by the student-name rule's `none` list before the guide rule
/// gets its turn, and "Group ID" must not be swallowed by the group-no rule
/// (the canonical schedule header has to stay a fixed point).
const HEADER_RULES: &[HeaderRule] = &[
    HeaderRule {
        tag: CanonicalHeader::GroupNo,
        any: &["group no", "grp no", "group number"],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::RollNo,
        any: &["roll no", "roll number", "rollno", "roll", "student id"],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::StudentName,
        any: &[
            "name of the group member",
            "name of group member",
            "group member name",
            "name of members",
            "member name",
            "student name",
            "name",
        ],
        none: &["guide", "company", "panel"],
    },
    HeaderRule {
        tag: CanonicalHeader::Contact,
        any: &[
            "contact details",
            "contact",
            "phone",
            "mobile",
            "email",
            "contact info",
        ],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::Domain,
        any: &["project domain", "projects domain", "domain", "field", "area"],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::Title,
        any: &[
            "title of the project",
            "project title",
            "title",
            "final title",
            "project name",
            "title of project",
        ],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::Sponsor,
        any: &[
            "name of the sponsored company",
            "sponsored company",
            "sponsor company",
            "company name",
            "sponsoring company",
            "name of sponsored",
        ],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::Guide,
        any: &[
            "name of the guide",
            "guide name",
            "guide",
            "supervisor",
            "mentor name",
            "faculty guide",
        ],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::Track,
        any: &["track", "panel no", "panel number"],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::PanelName,
        any: &[
            "name of the panel",
            "panel name",
            "panel members",
            "panel professors",
            "evaluators",
            "panel faculty",
        ],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::GroupId,
        any: &["group id", "grp id", "groups", "group nos", "assigned groups"],
        none: &[],
    },
    HeaderRule {
        tag: CanonicalHeader::Location,
        any: &["location", "room", "venue", "place"],
        none: &[],
    },
];

/// Lowercase, fold `_`/`-`/whitespace runs into single spaces, drop any other
/// punctuation.
fn clean_header(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for ch in raw.chars() {
        if ch.is_whitespace() || ch == '_' || ch == '-' {
            pending_space = true;
            continue;
        }
        if !ch.is_alphanumeric() {
            continue;
        }
        if pending_space && !out.is_empty() {
            out.push(' ');
        }
        pending_space = false;
        for lc in ch.to_lowercase() {
            out.push(lc);
        }
    }
    out
}

/// Map an arbitrary header cell to the canonical vocabulary, or `None` when
/// nothing matches (the caller keeps the raw header so unknown columns
/// survive uninterpreted).
pub fn normalize_header(raw: &str) -> Option<CanonicalHeader> {
    let cleaned = clean_header(raw);
    if cleaned.is_empty() {
        return None;
    }
    for rule in HEADER_RULES {
        if rule.any.iter().any(|p| cleaned.contains(p))
            && !rule.none.iter().any(|p| cleaned.contains(p))
        {
            return Some(rule.tag);
        }
    }
    None
}

/// Fold a faculty name for comparison purposes: case, dots, line breaks,
/// honorifics ("Dr", "Prof", "Professor") and single-letter initials all
/// disappear, so "Dr. A B Sharma" and "a b sharma" compare equal.
pub fn normalize_person_name(raw: &str) -> String {
    let lowered: String = raw
        .chars()
        .map(|ch| match ch {
            '\n' | '\r' => ' ',
            c => c,
        })
        .filter(|&c| c != '.')
        .flat_map(char::to_lowercase)
        .collect();

    let mut out = String::new();
    for token in lowered.split_whitespace() {
        if matches!(token, "dr" | "prof" | "professor") {
            continue;
        }
        if token.chars().count() == 1 {
            continue;
        }
        if !out.is_empty() {
            out.push(' ');
        }
        out.push_str(token);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_variants_map_to_canonical() {
        let cases = [
            ("Grp_No", CanonicalHeader::GroupNo),
            ("GROUP NUMBER", CanonicalHeader::GroupNo),
            ("Roll-No.", CanonicalHeader::RollNo),
            ("Student ID", CanonicalHeader::RollNo),
            ("Name of Group Member", CanonicalHeader::StudentName),
            ("Student Name", CanonicalHeader::StudentName),
            ("Mobile", CanonicalHeader::Contact),
            ("Projects Domain", CanonicalHeader::Domain),
            ("Final Title", CanonicalHeader::Title),
            ("Sponsoring Company", CanonicalHeader::Sponsor),
            ("Faculty Guide", CanonicalHeader::Guide),
            ("Panel No.", CanonicalHeader::Track),
            ("Panel Members", CanonicalHeader::PanelName),
            ("Assigned Groups", CanonicalHeader::GroupId),
            ("Venue", CanonicalHeader::Location),
        ];
        for (raw, want) in cases {
            assert_eq!(normalize_header(raw), Some(want), "header {raw:?}");
        }
    }

    #[test]
    fn name_like_headers_are_not_misclassified_as_student_name() {
        assert_eq!(
            normalize_header("Guide Name"),
            Some(CanonicalHeader::Guide)
        );
        assert_eq!(
            normalize_header("Name of the sponsored company "),
            Some(CanonicalHeader::Sponsor)
        );
        assert_eq!(
            normalize_header("Name of the Panel"),
            Some(CanonicalHeader::PanelName)
        );
    }

    #[test]
    fn canonical_labels_are_fixed_points() {
        let all = [
            CanonicalHeader::GroupNo,
            CanonicalHeader::RollNo,
            CanonicalHeader::StudentName,
            CanonicalHeader::Contact,
            CanonicalHeader::Domain,
            CanonicalHeader::Title,
            CanonicalHeader::Sponsor,
            CanonicalHeader::Guide,
            CanonicalHeader::Track,
            CanonicalHeader::PanelName,
            CanonicalHeader::GroupId,
            CanonicalHeader::Location,
        ];
        for tag in all {
            assert_eq!(normalize_header(tag.label()), Some(tag), "{}", tag.label());
        }
    }

    #[test]
    fn unknown_headers_stay_unrecognized() {
        assert_eq!(normalize_header("Remarks"), None);
        assert_eq!(normalize_header(""), None);
    }

    #[test]
    fn person_name_folding_strips_honorifics_and_initials() {
        assert_eq!(normalize_person_name("Dr. A B Sharma"), "sharma");
        assert_eq!(normalize_person_name("a b sharma"), "sharma");
        assert_eq!(
            normalize_person_name("Prof.\nRavi   Kulkarni"),
            "ravi kulkarni"
        );
        // Initials-only names fold to nothing at all.
        assert_eq!(normalize_person_name("Dr. X Y"), "");
    }
}
