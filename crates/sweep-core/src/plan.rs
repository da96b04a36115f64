use crate::config::TestConfig;
use anyhow::{anyhow, Result};
use std::fs;
use std::path::Path;

/// Reads a hand-written matrix: a YAML (or JSON) list of configurations.
pub fn load_plan(path: &Path) -> Result<Vec<TestConfig>> {
    let raw = fs::read_to_string(path)
        .map_err(|e| anyhow!("cannot read plan {}: {}", path.display(), e))?;
    let matrix: Vec<TestConfig> = serde_yaml::from_str(&raw)
        .map_err(|e| anyhow!("invalid plan {}: {}", path.display(), e))?;
    if matrix.is_empty() {
        return Err(anyhow!("plan {} has no configurations", path.display()));
    }
    Ok(matrix)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppMode;
    use chrono::Utc;

    fn temp_file(tag: &str, body: &str) -> std::path::PathBuf {
        let path = std::env::temp_dir().join(format!(
            "sweep_plan_{}_{}_{}.yaml",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::write(&path, body).expect("write plan");
        path
    }

    #[test]
    fn loads_yaml_list_in_order() {
        let path = temp_file(
            "ok",
            "- {machines: 3, hosts_per_node: 1, branching_factor: 2, rate: 30, rounds: 20}\n\
             - {machines: 3, hosts_per_node: 2, branching_factor: 3, rate: 30, rounds: 20, app: sign, root_failures: 1}\n",
        );
        let matrix = load_plan(&path).expect("plan loads");
        assert_eq!(matrix.len(), 2);
        assert_eq!(matrix[0].hosts_per_node, 1);
        assert_eq!(matrix[1].app, AppMode::Sign);
        assert_eq!(matrix[1].root_failures, 1);
        let _ = fs::remove_file(path);
    }

    #[test]
    fn rejects_empty_and_malformed_plans() {
        let empty = temp_file("empty", "[]\n");
        let err = load_plan(&empty).expect_err("empty plan must fail");
        assert!(err.to_string().contains("no configurations"), "unexpected: {}", err);
        let bad = temp_file("bad", "- {machines: three}\n");
        let err = load_plan(&bad).expect_err("bad plan must fail");
        assert!(err.to_string().contains("invalid plan"), "unexpected: {}", err);
        let _ = fs::remove_file(empty);
        let _ = fs::remove_file(bad);
    }
}
