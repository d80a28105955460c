//! Canonical team identity.
//!
//! Upstream team documents are inconsistent across seasons: the same program
//! shows up under different display names and, occasionally, under an
//! abbreviation another program also uses. Rankings are keyed on the
//! canonical `(name, abbreviation)` pair produced here, so a miss is an error
//! rather than a new team.

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result, UnmappedTeam};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TeamIdentity {
    pub name: String,
    pub abbreviation: String,
}

impl TeamIdentity {
    pub fn new(name: &str, abbreviation: &str) -> Self {
        Self {
            name: name.to_string(),
            abbreviation: abbreviation.to_string(),
        }
    }
}

/// Team fields as the upstream team document spells them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawTeam {
    pub school_name: String,
    pub team_name: String,
    pub abbreviation: String,
}

impl RawTeam {
    pub fn from_document(doc: &Value) -> Result<Self> {
        let text = |key: &str| {
            doc.get(key)
                .and_then(|v| v.as_str())
                .map(str::trim)
                .filter(|s| !s.is_empty())
        };

        let school_name = text("displayName")
            .ok_or_else(|| Error::MalformedTeam("missing displayName".to_string()))?
            .to_string();
        let team_name = text("nickname")
            .or_else(|| text("shortDisplayName"))
            .unwrap_or(school_name.as_str())
            .to_string();
        let abbreviation = match text("abbreviation") {
            Some(abbr) => abbr.to_string(),
            None => school_name.chars().take(4).collect::<String>().to_uppercase(),
        };

        Ok(Self {
            school_name,
            team_name,
            abbreviation,
        })
    }
}

/// Abbreviations whose display name drifts between seasons. Matched exactly,
/// ahead of everything else.
const FIXED_OVERRIDES: &[(&str, &str, &str)] = &[
    ("SJSU", "San Jose State", "SJSU"),
    ("USM", "Southern Mississippi", "USM"),
];

/// An abbreviation fragment shared by more than one program, resolved by a
/// marker in the school name. Anything else carrying the fragment is unmapped.
#[derive(Debug, Clone, Copy)]
pub struct Disambiguation {
    pub fragment: &'static str,
    pub school_marker: &'static str,
    pub name: &'static str,
    pub abbreviation: &'static str,
}

pub const DISAMBIGUATIONS: &[Disambiguation] = &[
    Disambiguation {
        fragment: "MIA",
        school_marker: "Hurricanes",
        name: "Miami (FL)",
        abbreviation: "MIA",
    },
    Disambiguation {
        fragment: "USC",
        school_marker: "Trojan",
        name: "USC",
        abbreviation: "USC",
    },
];

// ESPN abbreviation -> (canonical name, canonical abbreviation).
const BUILTIN_CORRECTIONS: &[(&str, &str, &str)] = &[
    ("AFA", "Air Force", "AFA"),
    ("ALA", "Alabama", "ALA"),
    ("APP", "Appalachian State", "APP"),
    ("ARIZ", "Arizona", "ARIZ"),
    ("ARK", "Arkansas", "ARK"),
    ("ARMY", "Army", "ARMY"),
    ("ASU", "Arizona State", "ASU"),
    ("AUB", "Auburn", "AUB"),
    ("BAY", "Baylor", "BAY"),
    ("BC", "Boston College", "BC"),
    ("BOIS", "Boise State", "BSU"),
    ("BSU", "Boise State", "BSU"),
    ("BYU", "BYU", "BYU"),
    ("CAL", "California", "CAL"),
    ("CCU", "Coastal Carolina", "CCU"),
    ("CIN", "Cincinnati", "CIN"),
    ("CLEM", "Clemson", "CLEM"),
    ("COLO", "Colorado", "COLO"),
    ("CSU", "Colorado State", "CSU"),
    ("DUKE", "Duke", "DUKE"),
    ("ECU", "East Carolina", "ECU"),
    ("FAU", "Florida Atlantic", "FAU"),
    ("FLA", "Florida", "FLA"),
    ("FRES", "Fresno State", "FRES"),
    ("FSU", "Florida State", "FSU"),
    ("GT", "Georgia Tech", "GT"),
    ("HOU", "Houston", "HOU"),
    ("ILL", "Illinois", "ILL"),
    ("IND", "Indiana", "IU"),
    ("IOWA", "Iowa", "IOWA"),
    ("ISU", "Iowa State", "ISU"),
    ("IU", "Indiana", "IU"),
    ("JMU", "James Madison", "JMU"),
    ("KSU", "Kansas State", "KSU"),
    ("KU", "Kansas", "KU"),
    ("LIB", "Liberty", "LIB"),
    ("LOU", "Louisville", "LOU"),
    ("LSU", "LSU", "LSU"),
    ("M-OH", "Miami (OH)", "M-OH"),
    ("MD", "Maryland", "MD"),
    ("MEM", "Memphis", "MEM"),
    ("MICH", "Michigan", "MICH"),
    ("MINN", "Minnesota", "MINN"),
    ("MISS", "Ole Miss", "MISS"),
    ("MIZ", "Missouri", "MIZ"),
    ("MRSH", "Marshall", "MRSH"),
    ("MSST", "Mississippi State", "MSST"),
    ("MSU", "Michigan State", "MSU"),
    ("NAVY", "Navy", "NAVY"),
    ("NCST", "NC State", "NCST"),
    ("ND", "Notre Dame", "ND"),
    ("NEB", "Nebraska", "NEB"),
    ("NIU", "Northern Illinois", "NIU"),
    ("NU", "Northwestern", "NU"),
    ("OKLA", "Oklahoma", "OKLA"),
    ("OKST", "Oklahoma State", "OKST"),
    ("ORE", "Oregon", "ORE"),
    ("ORST", "Oregon State", "ORST"),
    ("OSU", "Ohio State", "OSU"),
    ("PITT", "Pittsburgh", "PITT"),
    ("PSU", "Penn State", "PSU"),
    ("PUR", "Purdue", "PUR"),
    ("RUTG", "Rutgers", "RUTG"),
    ("SC", "South Carolina", "SC"),
    ("SDSU", "San Diego State", "SDSU"),
    ("SMU", "SMU", "SMU"),
    ("STAN", "Stanford", "STAN"),
    ("SYR", "Syracuse", "SYR"),
    ("TA&M", "Texas A&M", "TAMU"),
    ("TAMU", "Texas A&M", "TAMU"),
    ("TCU", "TCU", "TCU"),
    ("TENN", "Tennessee", "TENN"),
    ("TEX", "Texas", "TEX"),
    ("TOL", "Toledo", "TOL"),
    ("TROY", "Troy", "TROY"),
    ("TTU", "Texas Tech", "TTU"),
    ("TULN", "Tulane", "TULN"),
    ("UCF", "UCF", "UCF"),
    ("UCLA", "UCLA", "UCLA"),
    ("UGA", "Georgia", "UGA"),
    ("UK", "Kentucky", "UK"),
    ("UL", "Louisiana", "UL"),
    ("UNC", "North Carolina", "UNC"),
    ("UNLV", "UNLV", "UNLV"),
    ("USF", "South Florida", "USF"),
    ("UTAH", "Utah", "UTAH"),
    ("UTSA", "UTSA", "UTSA"),
    ("UVA", "Virginia", "UVA"),
    ("VT", "Virginia Tech", "VT"),
    ("WAKE", "Wake Forest", "WAKE"),
    ("WASH", "Washington", "WASH"),
    ("WIS", "Wisconsin", "WIS"),
    ("WKU", "Western Kentucky", "WKU"),
    ("WSU", "Washington State", "WSU"),
    ("WVU", "West Virginia", "WVU"),
];

static BUILTIN: Lazy<CorrectionTable> = Lazy::new(|| {
    CorrectionTable::from_entries(
        BUILTIN_CORRECTIONS
            .iter()
            .map(|(raw, name, abbr)| (raw.to_string(), TeamIdentity::new(name, abbr))),
    )
});

/// Upstream abbreviation -> canonical identity.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CorrectionTable {
    entries: HashMap<String, TeamIdentity>,
}

impl CorrectionTable {
    pub fn builtin() -> &'static CorrectionTable {
        &BUILTIN
    }

    pub fn from_entries(entries: impl IntoIterator<Item = (String, TeamIdentity)>) -> Self {
        Self {
            entries: entries.into_iter().collect(),
        }
    }

    /// Parses `{"ABBR": {"name": "...", "abbreviation": "..."}, ...}`.
    pub fn from_json_str(raw: &str) -> Result<Self> {
        let entries = serde_json::from_str::<HashMap<String, TeamIdentity>>(raw)?;
        Ok(Self { entries })
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn get(&self, abbreviation: &str) -> Option<&TeamIdentity> {
        self.entries.get(abbreviation)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn resolve(
        &self,
        team_name: &str,
        abbreviation: &str,
        school_name: &str,
    ) -> Result<TeamIdentity, UnmappedTeam> {
        if let Some((_, name, abbr)) = FIXED_OVERRIDES
            .iter()
            .find(|(raw, _, _)| *raw == abbreviation)
        {
            return Ok(TeamIdentity::new(name, abbr));
        }

        let unmapped = || UnmappedTeam {
            team_name: team_name.to_string(),
            abbreviation: abbreviation.to_string(),
            school_name: school_name.to_string(),
        };

        if let Some(rule) = DISAMBIGUATIONS
            .iter()
            .find(|rule| abbreviation.contains(rule.fragment))
        {
            return if school_name.contains(rule.school_marker) {
                Ok(TeamIdentity::new(rule.name, rule.abbreviation))
            } else {
                Err(unmapped())
            };
        }

        self.get(abbreviation).cloned().ok_or_else(unmapped)
    }

    pub fn resolve_raw(&self, raw: &RawTeam) -> Result<TeamIdentity, UnmappedTeam> {
        self.resolve(&raw.team_name, &raw.abbreviation, &raw.school_name)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn table() -> &'static CorrectionTable {
        CorrectionTable::builtin()
    }

    #[test]
    fn fixed_overrides_ignore_other_inputs() {
        let sjsu = table().resolve("anything", "SJSU", "whatever").unwrap();
        assert_eq!(sjsu, TeamIdentity::new("San Jose State", "SJSU"));
        let usm = table().resolve("", "USM", "").unwrap();
        assert_eq!(usm, TeamIdentity::new("Southern Mississippi", "USM"));

        let empty = CorrectionTable::default();
        assert!(empty.resolve("Spartans", "SJSU", "San José State Spartans").is_ok());
    }

    #[test]
    fn miami_needs_the_hurricanes() {
        let miami = table().resolve("X", "MIA", "Miami Hurricanes").unwrap();
        assert_eq!(miami, TeamIdentity::new("Miami (FL)", "MIA"));

        let err = table()
            .resolve("X", "MIA", "Ohio Miami RedHawks")
            .unwrap_err();
        assert_eq!(err.abbreviation, "MIA");
        assert_eq!(err.school_name, "Ohio Miami RedHawks");
        assert_eq!(err.team_name, "X");
    }

    #[test]
    fn usc_needs_the_trojans() {
        let usc = table().resolve("Trojans", "USC", "USC Trojans").unwrap();
        assert_eq!(usc, TeamIdentity::new("USC", "USC"));
        assert!(table().resolve("Gamecocks", "USC", "South Carolina").is_err());
    }

    #[test]
    fn disambiguation_wins_over_table_entries() {
        let table = CorrectionTable::from_entries([(
            "MIA".to_string(),
            TeamIdentity::new("Wrong", "WRG"),
        )]);
        assert!(table.resolve("X", "MIA", "Miami RedHawks").is_err());
    }

    #[test]
    fn table_lookup_canonicalizes() {
        assert_eq!(
            table().resolve("Aggies", "TA&M", "Texas A&M Aggies").unwrap(),
            TeamIdentity::new("Texas A&M", "TAMU")
        );
        assert_eq!(
            table().resolve("Bulldogs", "UGA", "Georgia Bulldogs").unwrap(),
            TeamIdentity::new("Georgia", "UGA")
        );
        assert_eq!(
            table().resolve("RedHawks", "M-OH", "Miami (OH) RedHawks").unwrap(),
            TeamIdentity::new("Miami (OH)", "M-OH")
        );
    }

    #[test]
    fn unknown_abbreviation_is_unmapped() {
        let err = table().resolve("Rams", "ZZZ", "Nowhere Rams").unwrap_err();
        assert_eq!(
            err,
            UnmappedTeam {
                team_name: "Rams".to_string(),
                abbreviation: "ZZZ".to_string(),
                school_name: "Nowhere Rams".to_string(),
            }
        );
    }

    #[test]
    fn table_loads_from_json() {
        let table = CorrectionTable::from_json_str(
            r#"{"UGA": {"name": "Georgia", "abbreviation": "UGA"}}"#,
        )
        .unwrap();
        assert_eq!(table.len(), 1);
        assert_eq!(table.get("UGA").unwrap().name, "Georgia");
        assert!(CorrectionTable::from_json_str("[1, 2]").is_err());
    }

    #[test]
    fn raw_team_prefers_nickname_then_short_name() {
        let raw = RawTeam::from_document(&json!({
            "displayName": "Georgia Bulldogs",
            "nickname": "Georgia",
            "shortDisplayName": "UGA",
            "abbreviation": "UGA"
        }))
        .unwrap();
        assert_eq!(raw.school_name, "Georgia Bulldogs");
        assert_eq!(raw.team_name, "Georgia");
        assert_eq!(raw.abbreviation, "UGA");

        let raw = RawTeam::from_document(&json!({
            "displayName": "Boise State Broncos",
            "shortDisplayName": "Boise St"
        }))
        .unwrap();
        assert_eq!(raw.team_name, "Boise St");
        assert_eq!(raw.abbreviation, "BOIS");

        assert!(RawTeam::from_document(&json!({"nickname": "X"})).is_err());
    }
}
