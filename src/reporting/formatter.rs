use crate::models::{Finding, ScanRecord, SeverityCounts};

pub fn format_finding_markdown(finding: &Finding) -> String {
    let mut out = format!(
        "### {}\n\n**Severity:** {}\n",
        finding.title, finding.severity,
    );
    if let Some(cve) = &finding.cve_id {
        out.push_str(&format!("**CVE:** {}\n", cve));
    }
    if let Some(component) = &finding.affected_component {
        out.push_str(&format!("**Affected component:** `{}`\n", component));
    }
    out.push_str(&format!("\n{}\n", finding.description));
    if let Some(remediation) = &finding.remediation_steps {
        out.push_str(&format!("\n**Remediation:** {}\n", remediation));
    }
    if !finding.reference_urls.is_empty() {
        out.push_str("\n**References:**\n");
        for url in &finding.reference_urls {
            out.push_str(&format!("- {}\n", url));
        }
    }
    out
}

pub fn format_executive_summary(counts: &SeverityCounts) -> String {
    format!(
        "## Executive Summary\n\n| Severity | Count |\n|---|---|\n| Critical | {} |\n| High | {} |\n| Medium | {} |\n| Low | {} |\n| Info | {} |\n| **Total** | **{}** |\n",
        counts.critical, counts.high, counts.medium, counts.low, counts.info, counts.total()
    )
}

pub fn format_scan_header(scan: &ScanRecord) -> String {
    let mut out = format!(
        "# Security Assessment Report: {}\n\n- Target: {}\n- Scan type: {}\n- Status: {}\n- Started: {}\n",
        scan.name,
        scan.target,
        scan.scan_kind,
        scan.status,
        scan.started_at.to_rfc3339(),
    );
    if let Some(completed) = scan.completed_at {
        out.push_str(&format!("- Completed: {}\n", completed.to_rfc3339()));
    }
    if let Some(error) = &scan.error {
        out.push_str(&format!("- Error: {}\n", error));
    }
    out
}
