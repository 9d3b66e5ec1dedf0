//! Fields encoded in a datalog's directory layout.
//!
//! ```text
//! <model>_DATA/<batch>/<phase>[/<aging end>]/<begin>[_<temp|group>]_<tester>/<chip>[_x][_failed].txt
//! 2910_DATA/202301/laolianhou/20230322/20230323_25C_ZS/1234_x.txt
//! ```

use chrono::NaiveDate;
use dlsync_common::types::{AgingPhase, FileKind, TestOutcome};
use regex::Regex;

const FAILED_SUFFIX: &str = "_failed";
const REPORT_SUFFIX: &str = "_x";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathFields {
    pub model: String,
    pub batch: String,
    pub aging_phase: AgingPhase,
    pub aging_end_date: Option<NaiveDate>,
    pub test_begin_date: NaiveDate,
    pub temperature: Option<i32>,
    pub qualification_group: Option<String>,
    pub tester_abbr: String,
    pub chip_id: String,
    pub surface_result: TestOutcome,
    pub file_kind: FileKind,
}

pub struct PathGrammar {
    pattern: Regex,
}

impl PathGrammar {
    pub fn new() -> Result<Self, regex::Error> {
        // Case-insensitive from the phase segment on
        let pattern = Regex::new(
            r"^(?P<model>[0-9]+)_DATA/(?P<batch>[0-9]+)/(?i)(?P<phase>laolianqian|laolianhou/(?P<aging_end>20[0-9]{6})|jd)/(?P<group>20[0-9]{6}(?:_[^/]*)?_[a-z,]{2,4})/(?P<file>[^0-9_/]{0,2}[0-9]+(?:_x)?(?:_failed)?\.txt)$",
        )?;
        Ok(Self { pattern })
    }

    /// Parse a `/`-separated path relative to the station's mirror root.
    pub fn parse(&self, relative: &str) -> Option<PathFields> {
        let relative = relative.replace('\\', "/");
        let caps = self.pattern.captures(relative.trim_start_matches('/'))?;

        let phase_token = caps.name("phase")?.as_str().to_lowercase();
        let aging_phase = if phase_token.starts_with("laolianhou") {
            AgingPhase::PostBurnIn
        } else if phase_token == "laolianqian" {
            AgingPhase::PreBurnIn
        } else {
            AgingPhase::Qualification
        };

        let aging_end_date = match caps.name("aging_end") {
            Some(m) => Some(parse_date(m.as_str())?),
            None => None,
        };

        let group: Vec<&str> = caps.name("group")?.as_str().split('_').collect();
        let test_begin_date = parse_date(group.first()?)?;
        let tester_abbr = group.last()?.to_string();

        // Token 1 is the temperature or group; in a two-token JD group it
        // doubles as the tester
        let (temperature, qualification_group) = match aging_phase {
            AgingPhase::PostBurnIn => (Some(parse_temperature(group.get(1)?)?), None),
            AgingPhase::Qualification => (None, Some(group.get(1)?.to_string())),
            AgingPhase::PreBurnIn => (None, None),
        };

        let file_name = caps.name("file")?.as_str();
        let chip_id = file_name.split(['.', '_']).next()?.to_string();

        let stem = file_name
            .rsplit_once('.')
            .map_or(file_name, |(stem, _)| stem)
            .to_lowercase();
        let surface_result = if stem.ends_with(FAILED_SUFFIX) {
            TestOutcome::Failed
        } else {
            TestOutcome::Passed
        };
        let file_kind = if stem.replace(FAILED_SUFFIX, "").ends_with(REPORT_SUFFIX) {
            FileKind::Report
        } else {
            FileKind::Process
        };

        Some(PathFields {
            model: caps.name("model")?.as_str().to_string(),
            batch: caps.name("batch")?.as_str().to_string(),
            aging_phase,
            aging_end_date,
            test_begin_date,
            temperature,
            qualification_group,
            tester_abbr,
            chip_id,
            surface_result,
            file_kind,
        })
    }
}

fn parse_date(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y%m%d").ok()
}

/// `25C` -> 25, `-40C` -> -40
fn parse_temperature(raw: &str) -> Option<i32> {
    raw.trim_end_matches(['C', 'c']).parse().ok()
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn grammar() -> PathGrammar {
        PathGrammar::new().unwrap()
    }

    #[test]
    fn test_post_burn_in_path() {
        let fields = grammar()
            .parse("2910_DATA/202301/laolianhou/20230322/20230323_25C_ZS/1234.txt")
            .unwrap();

        assert_eq!(fields.model, "2910");
        assert_eq!(fields.batch, "202301");
        assert_eq!(fields.aging_phase, AgingPhase::PostBurnIn);
        assert_eq!(fields.aging_end_date, NaiveDate::from_ymd_opt(2023, 3, 22));
        assert_eq!(fields.test_begin_date, NaiveDate::from_ymd_opt(2023, 3, 23).unwrap());
        assert_eq!(fields.temperature, Some(25));
        assert_eq!(fields.qualification_group, None);
        assert_eq!(fields.tester_abbr, "ZS");
        assert_eq!(fields.chip_id, "1234");
        assert_eq!(fields.surface_result, TestOutcome::Passed);
        assert_eq!(fields.file_kind, FileKind::Process);
    }

    #[test]
    fn test_negative_temperature() {
        let fields = grammar()
            .parse("2910_DATA/202301/LAOLIANHOU/20230322/20230323_-40C_ZS/1234.txt")
            .unwrap();
        assert_eq!(fields.temperature, Some(-40));
    }

    #[test]
    fn test_qualification_path_with_report_and_failed_suffixes() {
        let fields = grammar()
            .parse("/7788_DATA/9/JD/20240105_G2_WL/AB0042_X_Failed.TXT")
            .unwrap();

        assert_eq!(fields.aging_phase, AgingPhase::Qualification);
        assert_eq!(fields.aging_end_date, None);
        assert_eq!(fields.qualification_group.as_deref(), Some("G2"));
        assert_eq!(fields.temperature, None);
        assert_eq!(fields.tester_abbr, "WL");
        assert_eq!(fields.chip_id, "AB0042");
        assert_eq!(fields.surface_result, TestOutcome::Failed);
        assert_eq!(fields.file_kind, FileKind::Report);
    }

    #[test]
    fn test_two_token_qualification_group() {
        let fields = grammar()
            .parse("2910_DATA/202301/JD/20240105_WL/1.txt")
            .unwrap();

        assert_eq!(fields.aging_phase, AgingPhase::Qualification);
        assert_eq!(fields.test_begin_date, NaiveDate::from_ymd_opt(2024, 1, 5).unwrap());
        assert_eq!(fields.qualification_group.as_deref(), Some("WL"));
        assert_eq!(fields.tester_abbr, "WL");
        assert_eq!(fields.chip_id, "1");
    }

    #[test]
    fn test_pre_burn_in_path() {
        let fields = grammar()
            .parse("2910_DATA/202301/laolianqian/20230110_LJH/88_failed.txt")
            .unwrap();
        assert_eq!(fields.aging_phase, AgingPhase::PreBurnIn);
        assert_eq!(fields.tester_abbr, "LJH");
        assert_eq!(fields.surface_result, TestOutcome::Failed);
        assert_eq!(fields.file_kind, FileKind::Process);
        assert_eq!(fields.chip_id, "88");
    }

    #[test]
    fn test_paths_outside_the_grammar() {
        let g = grammar();
        // wrong phase token
        assert!(g.parse("2910_DATA/202301/burnin/20230110_LJH/88.txt").is_none());
        // data root must be numeric
        assert!(g.parse("ABC_DATA/202301/laolianqian/20230110_LJH/88.txt").is_none());
        // post burn-in needs the aging end folder
        assert!(g.parse("2910_DATA/202301/laolianhou/20230323_25C_ZS/1234.txt").is_none());
        // not a .txt log
        assert!(g.parse("2910_DATA/202301/laolianqian/20230110_LJH/88.csv").is_none());
        assert!(g.parse("2910_DATA/202301/laolianqian/20230110_LJH/88.txt.bak").is_none());
        // impossible calendar date
        assert!(g.parse("2910_DATA/202301/laolianqian/20231399_LJH/88.txt").is_none());
        // temperature token missing
        assert!(g.parse("2910_DATA/202301/laolianhou/20230322/20230323_ZS/1234.txt").is_none());
        // extra nesting
        assert!(g.parse("x/2910_DATA/202301/laolianqian/20230110_LJH/88.txt").is_none());
    }

    #[test]
    fn test_parse_is_deterministic() {
        let g = grammar();
        let path = "2910_DATA/202301/laolianhou/20230322/20230323_85C_ZS/1234_x.txt";
        assert_eq!(g.parse(path), g.parse(path));
    }
}
