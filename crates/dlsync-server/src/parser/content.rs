//! Verdicts derived from datalog contents.
//!
//! J750 and UltraFlex logs end with a Site/Sort/Bin table whose result row is
//! the second line after the header. ADV93000 logs list test suites, either
//! one line per suite (`_x` reports) or as Started/Ended blocks (process logs).

use dlsync_common::types::{FileKind, SystemFamily, TestOutcome};
use regex::Regex;
use std::collections::BTreeSet;
use std::io::{self, BufRead};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentVerdict {
    pub real_result: Option<TestOutcome>,
    pub content_error: bool,
    pub test_suites: Option<BTreeSet<String>>,
}

impl ContentVerdict {
    pub(crate) fn unreadable() -> Self {
        Self {
            real_result: None,
            content_error: true,
            test_suites: None,
        }
    }
}

pub struct ContentGrammar {
    bin_header: Regex,
    bin_pass: Regex,
    suite_line: Regex,
    suite_begin: Regex,
    suite_end: Regex,
}

/// Lines with `\n`/`\r\n` removed; invalid UTF-8 is replaced, not fatal.
fn lossy_lines<R: BufRead>(reader: R) -> impl Iterator<Item = io::Result<String>> {
    reader.split(b'\n').map(|chunk| {
        chunk.map(|bytes| {
            let mut line = String::from_utf8_lossy(&bytes).into_owned();
            if line.ends_with('\r') {
                line.pop();
            }
            line
        })
    })
}

impl ContentGrammar {
    pub fn new() -> Result<Self, regex::Error> {
        Ok(Self {
            bin_header: Regex::new(r"^\s+Site\s+Sort\s+Bin\s*$")?,
            bin_pass: Regex::new(r"^\s+0\s+1\s+1\s*$")?,
            suite_line: Regex::new(r"Test Suite\s(.*)\s(?:PASSED|FAILED)")?,
            suite_begin: Regex::new(r"=\sStarted Testsuite\s(.+)\s=")?,
            suite_end: Regex::new(r"=+\sEnded Testsuite\s.+\s=+")?,
        })
    }

    pub fn classify<R: BufRead>(
        &self,
        reader: R,
        family: SystemFamily,
        kind: FileKind,
    ) -> ContentVerdict {
        let outcome = match (family, kind) {
            (SystemFamily::J750 | SystemFamily::UltraFlex, _) => self.bin_table(reader),
            (SystemFamily::Adv93000, FileKind::Report) => self.suite_report(reader),
            (SystemFamily::Adv93000, FileKind::Process) => self.suite_blocks(reader),
        };
        outcome.unwrap_or_else(|_| ContentVerdict::unreadable())
    }

    fn bin_table<R: BufRead>(&self, reader: R) -> io::Result<ContentVerdict> {
        let mut lines = lossy_lines(reader);
        let mut headers = 0usize;
        let mut result_row: Option<String> = None;

        while let Some(line) = lines.next() {
            if self.bin_header.is_match(&line?) {
                headers += 1;
                // Separator row, then the result row
                if lines.next().transpose()?.is_none() {
                    result_row = None;
                    break;
                }
                result_row = lines.next().transpose()?;
            }
        }

        let content_error = headers > 1 || result_row.as_deref().map_or(true, str::is_empty);
        let real_result = result_row.map(|row| {
            if self.bin_pass.is_match(&row) {
                TestOutcome::Passed
            } else {
                TestOutcome::Failed
            }
        });

        Ok(ContentVerdict {
            real_result,
            content_error,
            test_suites: None,
        })
    }

    fn suite_report<R: BufRead>(&self, reader: R) -> io::Result<ContentVerdict> {
        let mut suites = BTreeSet::new();
        let mut overall = TestOutcome::Passed;

        for line in lossy_lines(reader) {
            let line = line?;
            if let Some(caps) = self.suite_line.captures(&line) {
                suites.insert(caps[1].to_string());
                if line.to_uppercase().contains("FAILED") {
                    overall = TestOutcome::Failed;
                }
            }
        }

        Ok(ContentVerdict {
            real_result: Some(overall),
            content_error: false,
            test_suites: Some(suites),
        })
    }

    fn suite_blocks<R: BufRead>(&self, reader: R) -> io::Result<ContentVerdict> {
        let mut lines = lossy_lines(reader);
        let mut suites = BTreeSet::new();
        let mut overall = TestOutcome::Passed;
        let mut truncated = false;

        'outer: while let Some(line) = lines.next() {
            let line = line?;
            let Some(caps) = self.suite_begin.captures(&line) else {
                continue;
            };
            suites.insert(caps[1].to_string());

            loop {
                let Some(inner) = lines.next().transpose()? else {
                    // Block never closed
                    truncated = true;
                    break 'outer;
                };
                if self.suite_end.is_match(&inner) {
                    break;
                }
                if inner.to_uppercase().contains("FAILED") {
                    overall = TestOutcome::Failed;
                    break;
                }
            }
        }

        Ok(ContentVerdict {
            real_result: Some(overall),
            content_error: truncated,
            test_suites: Some(suites),
        })
    }
}
