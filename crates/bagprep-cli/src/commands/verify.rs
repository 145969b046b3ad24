use super::{colorize_status, json_pretty, EXIT_BAG_ERROR, EXIT_SUCCESS};
use bagprep_store::{verify_bag, BagLayout};
use std::path::Path;

pub fn run(bagdir: &Path, json: bool) -> Result<u8, String> {
    let report = verify_bag(&BagLayout::new(bagdir)).map_err(|e| e.to_string())?;

    if json {
        let failures: Vec<_> = report
            .failed
            .iter()
            .map(|f| serde_json::json!({"path": f.path, "reason": f.reason}))
            .collect();
        let payload = serde_json::json!({
            "bag": bagdir.display().to_string(),
            "checked": report.checked,
            "passed": report.passed,
            "tags_checked": report.tags_checked,
            "tags_passed": report.tags_passed,
            "failed": failures,
            "valid": report.is_valid(),
        });
        println!("{}", json_pretty(&payload)?);
    } else {
        println!(
            "payload: {}/{} files passed, tags: {}/{} passed",
            report.passed, report.checked, report.tags_passed, report.tags_checked
        );
        for f in &report.failed {
            println!("  {} {}: {}", colorize_status(false, "FAIL"), f.path, f.reason);
        }
        if report.is_valid() {
            println!("{}", colorize_status(true, "bag is valid"));
        }
    }

    if report.is_valid() {
        Ok(EXIT_SUCCESS)
    } else {
        Ok(EXIT_BAG_ERROR)
    }
}
