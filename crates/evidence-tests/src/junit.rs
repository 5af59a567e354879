use evidence_core::{TestArtifactDocument, TestStatus};

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c if c.is_control() && c != '\n' && c != '\t' => out.push(' '),
            c => out.push(c),
        }
    }
    out
}

/// One `<testcase>` per test; at most one `<failure>`.
pub fn render(doc: &TestArtifactDocument) -> String {
    let failed_assertions: Vec<&str> = doc
        .assertions
        .iter()
        .filter(|a| a.status == TestStatus::Failed)
        .map(|a| a.assertion_id.as_str())
        .collect();
    let failed = doc.result == TestStatus::Failed;

    let mut xml = String::new();
    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str(&format!(
        "<testsuite name=\"{}\" tests=\"1\" failures=\"{}\" timestamp=\"{}\">\n",
        escape(doc.suite_type.as_str()),
        u8::from(failed),
        escape(&doc.executed_at)
    ));
    xml.push_str(&format!(
        "  <testcase classname=\"{}.{}\" name=\"{}\">\n",
        escape(doc.suite_type.as_str()),
        escape(&doc.test_id),
        escape(&doc.test_id)
    ));
    if failed {
        let (message, body) = if failed_assertions.is_empty() {
            ("job outcome reported failure".to_string(), String::new())
        } else {
            (
                "at least one assertion failed".to_string(),
                format!("failed assertions: {}", failed_assertions.join(", ")),
            )
        };
        xml.push_str(&format!(
            "    <failure message=\"{}\">{}</failure>\n",
            escape(&message),
            escape(&body)
        ));
    }
    xml.push_str("    <system-out>");
    for a in &doc.assertions {
        xml.push_str(&format!(
            "\n{} {}: {}",
            a.status.as_str().to_uppercase(),
            escape(&a.assertion_id),
            escape(&a.name)
        ));
    }
    xml.push_str("\n    </system-out>\n");
    xml.push_str("  </testcase>\n</testsuite>\n");
    xml
}
