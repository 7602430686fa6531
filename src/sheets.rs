use serde::Serialize;
use std::fmt;

/// The three logical sheets every upload must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetRole {
    DivA,
    DivB,
    Schedule,
}

impl SheetRole {
    pub fn key(self) -> &'static str {
        match self {
            SheetRole::DivA => "div_a",
            SheetRole::DivB => "div_b",
            SheetRole::Schedule => "schedule",
        }
    }

    pub fn from_key(key: &str) -> Option<SheetRole> {
        match key {
            "div_a" => Some(SheetRole::DivA),
            "div_b" => Some(SheetRole::DivB),
            "schedule" => Some(SheetRole::Schedule),
            _ => None,
        }
    }
}

impl fmt::Display for SheetRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.key())
    }
}

/// Role keyword sets, checked in the fixed order A, B, Schedule. A sheet name
/// matching more than one role is claimed by the earliest-checked role.
const DIV_A_MARKERS: &[&str] = &[
    "FINAL DIV A",
    "FINALDIVA",
    "FINAL_DIV_A",
    "FINAL-DIV-A",
    "DIV A",
    "DIVA",
    "DIV-A",
    "DIV_A",
    "DIVISION A",
    "DIVISIONA",
    "DIVISION-A",
    "DIVISION_A",
];

const DIV_B_MARKERS: &[&str] = &[
    "FINAL DIV B",
    "FINALDIVB",
    "FINAL_DIV_B",
    "FINAL-DIV-B",
    "DIV B",
    "DIVB",
    "DIV-B",
    "DIV_B",
    "DIVISION B",
    "DIVISIONB",
    "DIVISION-B",
    "DIVISION_B",
];

const SCHEDULE_MARKERS: &[&str] = &[
    "SCHEDULE",
    "SCHED",
    "PANEL SCHEDULE",
    "EVALUATION SCHEDULE",
    "PANEL_SCHEDULE",
    "EVALUATION_SCHEDULE",
    "PANEL-SCHEDULE",
];

/// Detected sheet name per role. Any `None` is a hard ingestion failure;
/// callers must reject the upload and surface the raw sheet list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct DetectedSheets {
    pub div_a: Option<String>,
    pub div_b: Option<String>,
    pub schedule: Option<String>,
}

impl DetectedSheets {
    pub fn name_for(&self, role: SheetRole) -> Option<&str> {
        match role {
            SheetRole::DivA => self.div_a.as_deref(),
            SheetRole::DivB => self.div_b.as_deref(),
            SheetRole::Schedule => self.schedule.as_deref(),
        }
    }

    pub fn missing_roles(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.div_a.is_none() {
            missing.push(SheetRole::DivA.key());
        }
        if self.div_b.is_none() {
            missing.push(SheetRole::DivB.key());
        }
        if self.schedule.is_none() {
            missing.push(SheetRole::Schedule.key());
        }
        missing
    }

    pub fn is_complete(&self) -> bool {
        self.missing_roles().is_empty()
    }
}

/// Classify arbitrary sheet names into the three roles. When several sheets
/// match the same role, the last one in workbook order wins.
pub fn classify_sheets<S: AsRef<str>>(sheet_names: &[S]) -> DetectedSheets {
    let mut detected = DetectedSheets::default();
    for name in sheet_names {
        let raw = name.as_ref();
        let upper = raw.trim().to_uppercase();
        if DIV_A_MARKERS.iter().any(|m| upper.contains(m)) {
            detected.div_a = Some(raw.to_string());
        } else if DIV_B_MARKERS.iter().any(|m| upper.contains(m)) {
            detected.div_b = Some(raw.to_string());
        } else if SCHEDULE_MARKERS.iter().any(|m| upper.contains(m)) {
            detected.schedule = Some(raw.to_string());
        }
    }
    detected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_all_three_roles_in_any_order() {
        let names = ["Panel Schedule", "Final Div B ", "FINAL DIV-A"];
        let detected = classify_sheets(&names);
        assert_eq!(detected.div_a.as_deref(), Some("FINAL DIV-A"));
        assert_eq!(detected.div_b.as_deref(), Some("Final Div B "));
        assert_eq!(detected.schedule.as_deref(), Some("Panel Schedule"));
        assert!(detected.is_complete());

        let reordered = ["FINAL DIV-A", "Panel Schedule", "Final Div B "];
        let detected2 = classify_sheets(&reordered);
        assert!(detected2.is_complete());
    }

    #[test]
    fn underscore_and_concatenated_variants() {
        let detected = classify_sheets(&["final_div_a", "DIVB", "evaluation_schedule"]);
        assert!(detected.is_complete());
    }

    #[test]
    fn missing_roles_are_reported() {
        let detected = classify_sheets(&["Sheet1", "Final Div A"]);
        assert_eq!(detected.missing_roles(), vec!["div_b", "schedule"]);
        assert!(!detected.is_complete());
    }

    #[test]
    fn classification_is_idempotent_on_detected_names() {
        let detected = classify_sheets(&["Final Div A", "Final Div B", "Schedule"]);
        let again = classify_sheets(&[
            detected.div_a.clone().unwrap(),
            detected.div_b.clone().unwrap(),
            detected.schedule.clone().unwrap(),
        ]);
        assert_eq!(again.div_a, detected.div_a);
        assert_eq!(again.div_b, detected.div_b);
        assert_eq!(again.schedule, detected.schedule);
    }
}
