//! Plan resolution and ordering
//!
//! Each requested (package, target) pair is resolved against the
//! configuration up front: the effective update config is attached to the
//! plan, unsupported packages are marked NotConfigured, and configuration
//! failures are marked ConfigError without aborting the remaining
//! requests. Sorting places group members adjacently so the orchestrator
//! can batch consecutive runs, with named groups ahead of ungrouped
//! packages.

use crate::config::{resolve_update_config, Config};
use crate::domain::{Package, PlannedUpdate, UpdateResult, UpdateStatus};
use crate::update::drift::versions_match;
use std::cmp::Ordering;
use std::sync::Arc;

/// Resolves update plans for the requested (package, target) pairs
pub fn resolve_plans(requests: Vec<(Package, String)>, cfg: &Config) -> Vec<PlannedUpdate> {
    let mut plans = Vec::with_capacity(requests.len());

    for (package, target) in requests {
        let resolved = resolve_update_config(&package, cfg);
        let rule = package.rule.clone();
        let name = package.name.clone();
        let mut result = UpdateResult::planned(package, target);

        match resolved {
            Ok(update_cfg) => {
                let group = update_cfg
                    .group
                    .clone()
                    .or_else(|| result.package.group.clone())
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty());

                if result.package.version.contains('*') {
                    result.status = UpdateStatus::Floating;
                } else if versions_match(&result.package.version, &result.target) {
                    result.status = UpdateStatus::UpToDate;
                }

                let group_key = match &group {
                    Some(group) => format!("{}|{}", rule, group),
                    None => format!("{}|solo|{}", rule, name),
                };
                result.group = group.unwrap_or_default();
                plans.push(PlannedUpdate::new(Some(update_cfg), result, group_key));
            }
            Err(error) => {
                let status = if error.is_unsupported() {
                    UpdateStatus::NotConfigured
                } else {
                    UpdateStatus::ConfigError
                };
                result.fail_with(status, Arc::new(error));
                let group_key = format!("{}|solo|{}", rule, name);
                plans.push(PlannedUpdate::new(None, result, group_key));
            }
        }
    }

    plans
}

/// Sorts plans so group members are adjacent: by rule, package type, group
/// (named groups before ungrouped), dependency type and name
pub fn sort_plans(plans: &mut [PlannedUpdate]) {
    plans.sort_by(|a, b| {
        let pa = &a.result.package;
        let pb = &b.result.package;
        pa.rule
            .cmp(&pb.rule)
            .then_with(|| pa.package_type.cmp(&pb.package_type))
            .then_with(|| compare_groups(&a.result.group, &b.result.group))
            .then_with(|| pa.dep_type.cmp(&pb.dep_type))
            .then_with(|| pa.name.cmp(&pb.name))
    });
}

/// Orders group labels with named groups before empty ones
fn compare_groups(a: &str, b: &str) -> Ordering {
    let a = a.trim();
    let b = b.trim();
    match (a.is_empty(), b.is_empty()) {
        (false, true) => Ordering::Less,
        (true, false) => Ordering::Greater,
        _ => a.cmp(b),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{RuleConfig, UpdateCommandConfig};

    fn config_with_group(group: Option<&str>) -> Config {
        let mut cfg = Config::default();
        let mut rule = RuleConfig {
            format: "json".to_string(),
            ..Default::default()
        };
        rule.update = Some(UpdateCommandConfig {
            commands: "npm install".to_string(),
            group: group.map(|g| g.to_string()),
            ..Default::default()
        });
        cfg.rules.insert("npm".to_string(), rule);
        cfg
    }

    fn package(name: &str, version: &str) -> Package {
        Package::new(name, version, "npm", "package.json").with_package_type("npm")
    }

    #[test]
    fn test_resolve_plans_grouped() {
        let cfg = config_with_group(Some("frontend"));
        let plans = resolve_plans(
            vec![
                (package("react", "17.0.0"), "18.0.0".to_string()),
                (package("react-dom", "17.0.0"), "18.0.0".to_string()),
            ],
            &cfg,
        );
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[0].group_key, "npm|frontend");
        assert_eq!(plans[0].group_key, plans[1].group_key);
        assert_eq!(plans[0].result.status, UpdateStatus::Planned);
        assert!(plans[0].update_cfg.is_some());
        assert_eq!(plans[0].original, "17.0.0");
    }

    #[test]
    fn test_resolve_plans_ungrouped_packages_get_solo_keys() {
        let cfg = config_with_group(None);
        let plans = resolve_plans(
            vec![
                (package("react", "17.0.0"), "18.0.0".to_string()),
                (package("vue", "3.0.0"), "3.4.0".to_string()),
            ],
            &cfg,
        );
        assert_ne!(plans[0].group_key, plans[1].group_key);
    }

    #[test]
    fn test_resolve_plans_up_to_date() {
        let cfg = config_with_group(None);
        let plans = resolve_plans(vec![(package("react", "18.0.0"), "18.0.0".to_string())], &cfg);
        assert_eq!(plans[0].result.status, UpdateStatus::UpToDate);
    }

    #[test]
    fn test_resolve_plans_floating_version() {
        let cfg = config_with_group(None);
        let plans = resolve_plans(vec![(package("react", "18.*"), "18.2.0".to_string())], &cfg);
        assert_eq!(plans[0].result.status, UpdateStatus::Floating);
    }

    #[test]
    fn test_resolve_plans_missing_update_config() {
        let mut cfg = Config::default();
        cfg.rules.insert(
            "npm".to_string(),
            RuleConfig {
                format: "json".to_string(),
                ..Default::default()
            },
        );
        let plans = resolve_plans(vec![(package("react", "17.0.0"), "18.0.0".to_string())], &cfg);
        assert_eq!(plans[0].result.status, UpdateStatus::NotConfigured);
        assert!(plans[0].update_cfg.is_none());
        assert!(!plans[0].result.error_message().is_empty());
    }

    #[test]
    fn test_resolve_plans_missing_rule_is_config_error() {
        let cfg = Config::default();
        let plans = resolve_plans(vec![(package("react", "17.0.0"), "18.0.0".to_string())], &cfg);
        assert_eq!(plans[0].result.status, UpdateStatus::ConfigError);
    }

    #[test]
    fn test_resolve_plans_package_group_used_when_config_has_none() {
        let cfg = config_with_group(None);
        let pkg = package("react", "17.0.0").with_group("ui");
        let plans = resolve_plans(vec![(pkg, "18.0.0".to_string())], &cfg);
        assert_eq!(plans[0].group_key, "npm|ui");
        assert_eq!(plans[0].result.group, "ui");
    }

    #[test]
    fn test_sort_plans_named_groups_first() {
        let cfg = config_with_group(None);
        let mut plans = resolve_plans(
            vec![
                (package("zzz", "1.0.0"), "2.0.0".to_string()),
                (package("aaa", "1.0.0").with_group("g1"), "2.0.0".to_string()),
            ],
            &cfg,
        );
        sort_plans(&mut plans);
        assert_eq!(plans[0].result.package.name, "aaa");
        assert_eq!(plans[1].result.package.name, "zzz");
    }

    #[test]
    fn test_sort_plans_groups_are_adjacent() {
        let cfg = config_with_group(None);
        let mut plans = resolve_plans(
            vec![
                (package("solo-a", "1.0.0"), "2.0.0".to_string()),
                (package("grouped-z", "1.0.0").with_group("g"), "2.0.0".to_string()),
                (package("solo-b", "1.0.0"), "2.0.0".to_string()),
                (package("grouped-a", "1.0.0").with_group("g"), "2.0.0".to_string()),
            ],
            &cfg,
        );
        sort_plans(&mut plans);
        let names: Vec<&str> = plans.iter().map(|p| p.result.package.name.as_str()).collect();
        assert_eq!(names, vec!["grouped-a", "grouped-z", "solo-a", "solo-b"]);
        assert_eq!(plans[0].group_key, plans[1].group_key);
    }

    #[test]
    fn test_compare_groups() {
        assert_eq!(compare_groups("a", "b"), Ordering::Less);
        assert_eq!(compare_groups("named", ""), Ordering::Less);
        assert_eq!(compare_groups("", "named"), Ordering::Greater);
        assert_eq!(compare_groups("", ""), Ordering::Equal);
    }
}
