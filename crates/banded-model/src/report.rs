use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;

use crate::{Group, GroupLevel, ResetPolicy, Variable};

/// Structural problems in a report definition, detected before any engine
/// work begins.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DefinitionError {
    #[error("variable name cannot be empty")]
    EmptyVariableName,
    #[error("duplicate variable: {name}")]
    DuplicateVariable { name: String },
    #[error("group name cannot be empty")]
    EmptyGroupName,
    #[error("group {name} declares level 0 (levels start at 1)")]
    GroupLevelZero { name: String },
    #[error("duplicate group level {level}")]
    DuplicateGroupLevel { level: GroupLevel },
    #[error("variable {variable} resets at group level {level}, which no group declares")]
    UnknownResetLevel {
        variable: String,
        level: GroupLevel,
    },
}

/// The declarative half of a report: its variables and groups.
///
/// Everything else (bands, styling, queries) lives in the host application;
/// the engine only needs these declarations plus the record stream.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportDefinition {
    pub variables: Vec<Variable>,
    pub groups: Vec<Group>,
}

impl ReportDefinition {
    #[must_use]
    pub fn new(variables: Vec<Variable>, groups: Vec<Group>) -> Self {
        Self { variables, groups }
    }

    /// Groups ordered ascending by level (coarsest first).
    #[must_use]
    pub fn groups_sorted(&self) -> Vec<&Group> {
        let mut out: Vec<&Group> = self.groups.iter().collect();
        out.sort_by_key(|g| g.level);
        out
    }

    /// Validates declaration-level invariants.
    ///
    /// Expression-level analysis (undeclared variable references, cycles) is
    /// the engine's dependency resolver's job; this only checks the shapes a
    /// definition must satisfy regardless of expressions.
    pub fn validate(&self) -> Result<(), DefinitionError> {
        let mut seen_names: HashSet<&str> = HashSet::with_capacity(self.variables.len());
        for variable in &self.variables {
            if variable.name.is_empty() {
                return Err(DefinitionError::EmptyVariableName);
            }
            if !seen_names.insert(variable.name.as_str()) {
                return Err(DefinitionError::DuplicateVariable {
                    name: variable.name.clone(),
                });
            }
        }

        let mut seen_levels: HashSet<GroupLevel> = HashSet::with_capacity(self.groups.len());
        for group in &self.groups {
            if group.name.is_empty() {
                return Err(DefinitionError::EmptyGroupName);
            }
            if group.level.get() == 0 {
                return Err(DefinitionError::GroupLevelZero {
                    name: group.name.clone(),
                });
            }
            if !seen_levels.insert(group.level) {
                return Err(DefinitionError::DuplicateGroupLevel { level: group.level });
            }
        }

        for variable in &self.variables {
            if let ResetPolicy::Group(level) = variable.reset {
                if !seen_levels.contains(&level) {
                    return Err(DefinitionError::UnknownResetLevel {
                        variable: variable.name.clone(),
                        level,
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Expr, VariableKind};
    use pretty_assertions::assert_eq;

    fn sum_var(name: &str, reset: ResetPolicy) -> Variable {
        Variable::new(name, VariableKind::Sum, Expr::field("amount"), reset)
    }

    #[test]
    fn accepts_a_well_formed_definition() {
        let def = ReportDefinition::new(
            vec![
                sum_var("total", ResetPolicy::Report),
                sum_var("region_total", ResetPolicy::Group(GroupLevel(1))),
            ],
            vec![Group::new("region", 1u32, Expr::field("region"))],
        );
        assert_eq!(def.validate(), Ok(()));
    }

    #[test]
    fn rejects_duplicate_variable_names() {
        let def = ReportDefinition::new(
            vec![
                sum_var("total", ResetPolicy::Report),
                sum_var("total", ResetPolicy::Detail),
            ],
            vec![],
        );
        assert_eq!(
            def.validate(),
            Err(DefinitionError::DuplicateVariable {
                name: "total".into()
            })
        );
    }

    #[test]
    fn rejects_duplicate_group_levels_and_level_zero() {
        let def = ReportDefinition::new(
            vec![],
            vec![
                Group::new("region", 1u32, Expr::field("region")),
                Group::new("city", 1u32, Expr::field("city")),
            ],
        );
        assert_eq!(
            def.validate(),
            Err(DefinitionError::DuplicateGroupLevel {
                level: GroupLevel(1)
            })
        );

        let def = ReportDefinition::new(vec![], vec![Group::new("region", 0u32, Expr::field("region"))]);
        assert_eq!(
            def.validate(),
            Err(DefinitionError::GroupLevelZero {
                name: "region".into()
            })
        );
    }

    #[test]
    fn rejects_reset_level_no_group_declares() {
        let def = ReportDefinition::new(
            vec![sum_var("region_total", ResetPolicy::Group(GroupLevel(2)))],
            vec![Group::new("region", 1u32, Expr::field("region"))],
        );
        assert_eq!(
            def.validate(),
            Err(DefinitionError::UnknownResetLevel {
                variable: "region_total".into(),
                level: GroupLevel(2)
            })
        );
    }

    #[test]
    fn groups_sorted_orders_by_level_ascending() {
        let def = ReportDefinition::new(
            vec![],
            vec![
                Group::new("city", 2u32, Expr::field("city")),
                Group::new("region", 1u32, Expr::field("region")),
            ],
        );
        let sorted = def.groups_sorted();
        assert_eq!(sorted[0].name, "region");
        assert_eq!(sorted[1].name, "city");
    }

    #[test]
    fn definition_round_trips_through_serde() {
        let def = ReportDefinition::new(
            vec![sum_var("region_total", ResetPolicy::Group(GroupLevel(1))).with_initial_value(0.0)],
            vec![Group::new("region", 1u32, Expr::field("region"))],
        );

        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["variables"][0]["kind"], "sum");
        assert_eq!(json["variables"][0]["reset"]["scope"], "group");
        assert_eq!(json["variables"][0]["reset"]["level"], 1);

        let back: ReportDefinition = serde_json::from_value(json).unwrap();
        assert_eq!(back, def);
    }
}
