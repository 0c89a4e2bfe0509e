//! JUnit XML test reports.
//!
//! Accepts a single `<testsuite>` root, or a `<testsuites>` wrapper holding
//! exactly one suite.

use chrono::Utc;
use roxmltree::{Document, Node};
use tracing::warn;
use uuid::Uuid;

use opencorps_core::{TestCase, TestResult};

use crate::error::JunitError;

/// Parse a report into an unlinked [`TestResult`]. The caller fills in the
/// job, build, push and project links.
pub fn parse(xml: &str) -> Result<TestResult, JunitError> {
    let doc = Document::parse(xml)?;
    let root = doc.root_element();
    let suite = match root.tag_name().name() {
        "testsuite" => root,
        "testsuites" => {
            let suites: Vec<Node<'_, '_>> = root
                .children()
                .filter(|n| n.has_tag_name("testsuite"))
                .collect();
            match suites.as_slice() {
                [only] => *only,
                other => return Err(JunitError::SuiteCount(other.len())),
            }
        }
        other => return Err(JunitError::UnexpectedRoot(other.to_owned())),
    };

    let tests = count(&suite, "tests")?;
    let errors = count(&suite, "errors")?;
    let failures = count(&suite, "failures")?;
    let skipped = count(&suite, "skipped")?;

    let testcases = suite
        .children()
        .filter(|n| n.has_tag_name("testcase"))
        .map(|n| testcase(&n))
        .collect::<Result<Vec<_>, _>>()?;

    let passed = tests.saturating_sub(errors.saturating_add(failures).saturating_add(skipped));
    let seen = testcases.iter().filter(|c| c.passed).count();
    if usize::try_from(passed).ok() != Some(seen) {
        warn!(passed, seen, "suite counts disagree with the test cases reported");
    }

    Ok(TestResult {
        id: Uuid::new_v4(),
        tests,
        errors,
        failures,
        skipped,
        passed,
        time: testcases.iter().map(|c| c.time).sum(),
        testcases,
        job: None,
        build: None,
        push: None,
        project: None,
        valid: true,
        created_at: Utc::now(),
    })
}

fn count(node: &Node<'_, '_>, name: &'static str) -> Result<u32, JunitError> {
    match node.attribute(name) {
        None => Ok(0),
        Some(value) => value.trim().parse().map_err(|_| JunitError::BadAttribute {
            name,
            value: value.to_owned(),
        }),
    }
}

fn testcase(node: &Node<'_, '_>) -> Result<TestCase, JunitError> {
    let time = match node.attribute("time") {
        None => 0.0,
        Some(value) => value.trim().parse().map_err(|_| JunitError::BadAttribute {
            name: "time",
            value: value.to_owned(),
        })?,
    };
    let failure = outcome(node, "failure");
    let error = outcome(node, "error");
    let skipped = outcome(node, "skipped");
    Ok(TestCase {
        classname: node.attribute("classname").unwrap_or_default().to_owned(),
        name: node.attribute("name").unwrap_or_default().to_owned(),
        time,
        passed: failure.is_none() && error.is_none() && skipped.is_none(),
        failure,
        error,
        skipped,
        stdout: child_text(node, "system-out"),
        stderr: child_text(node, "system-err"),
    })
}

/// Text of a `<failure>`/`<error>`/`<skipped>` child, falling back to its
/// `message` attribute. `Some("")` when the element is present but empty.
fn outcome(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    let child = node.children().find(|c| c.has_tag_name(tag))?;
    Some(
        child
            .text()
            .or_else(|| child.attribute("message"))
            .unwrap_or_default()
            .to_owned(),
    )
}

fn child_text(node: &Node<'_, '_>, tag: &str) -> Option<String> {
    node.children()
        .find(|c| c.has_tag_name(tag))
        .and_then(|c| c.text())
        .map(str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VUNIT: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<testsuite errors="0" failures="1" skipped="1" tests="4">
  <testcase classname="lib.tb_uart" name="test_tx" time="1.5"/>
  <testcase classname="lib.tb_uart" name="test_rx" time="2.0">
    <system-out>ok</system-out>
  </testcase>
  <testcase classname="lib.tb_uart" name="test_parity" time="0.5">
    <failure message="parity mismatch">expected 1 got 0</failure>
  </testcase>
  <testcase classname="lib.tb_uart" name="test_break" time="0">
    <skipped message="not implemented"/>
  </testcase>
</testsuite>"#;

    #[test]
    fn counts_and_cases() {
        let r = parse(VUNIT).unwrap();
        assert_eq!((r.tests, r.failures, r.skipped, r.errors), (4, 1, 1, 0));
        assert_eq!(r.passed, 2);
        assert!((r.time - 4.0).abs() < f64::EPSILON);
        assert_eq!(r.testcases.len(), 4);
        assert_eq!(r.testcases[1].stdout.as_deref(), Some("ok"));
        assert_eq!(r.testcases[2].failure.as_deref(), Some("expected 1 got 0"));
        assert_eq!(r.testcases[3].skipped.as_deref(), Some("not implemented"));
        assert!(r.valid);
        assert!(r.job.is_none());
    }

    #[test]
    fn wrapper_with_one_suite_is_accepted() {
        let xml = format!("<testsuites>{}</testsuites>", VUNIT.split_once("?>").unwrap().1);
        assert_eq!(parse(&xml).unwrap().tests, 4);
    }

    #[test]
    fn wrapper_with_two_suites_is_rejected() {
        let xml = "<testsuites><testsuite tests=\"0\"/><testsuite tests=\"0\"/></testsuites>";
        assert!(matches!(parse(xml), Err(JunitError::SuiteCount(2))));
    }

    #[test]
    fn non_numeric_count_is_rejected() {
        let xml = "<testsuite tests=\"many\"/>";
        assert!(matches!(
            parse(xml),
            Err(JunitError::BadAttribute { name: "tests", .. })
        ));
    }

    #[test]
    fn oversized_counts_do_not_overflow() {
        let xml = "<testsuite tests=\"1\" errors=\"4294967295\" failures=\"1\"/>";
        let r = parse(xml).unwrap();
        assert_eq!(r.errors, u32::MAX);
        assert_eq!(r.passed, 0);
    }

    #[test]
    fn wrong_root_is_rejected() {
        assert!(matches!(parse("<report/>"), Err(JunitError::UnexpectedRoot(r)) if r == "report"));
    }

    #[test]
    fn malformed_xml_is_rejected() {
        assert!(matches!(parse("<testsuite>"), Err(JunitError::Xml(_))));
    }
}
