//! Stacks - IaC deploy units attached to groups and accounts

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use crate::error::Error;

/// Kind of IaC stack, selecting the deploy strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackKind {
    /// Declarative template deployed through change sets
    DeclarativeTemplate,
    /// Programmatic IaC app (bootstrap, synth, diff/deploy)
    ProgrammaticIac,
    /// Generic IaC module (init, plan/apply)
    GenericIac,
    /// Service control policy module, targeting groups or accounts
    PolicyDocument,
}

impl StackKind {
    /// Name used in organization documents.
    pub fn name(&self) -> &'static str {
        match self {
            StackKind::DeclarativeTemplate => "DeclarativeTemplate",
            StackKind::ProgrammaticIac => "ProgrammaticIaC",
            StackKind::GenericIac => "GenericIaC",
            StackKind::PolicyDocument => "PolicyDocument",
        }
    }

    /// Short name used in console output.
    pub fn label(&self) -> &'static str {
        match self {
            StackKind::DeclarativeTemplate => "template",
            StackKind::ProgrammaticIac => "cdk",
            StackKind::GenericIac => "terraform",
            StackKind::PolicyDocument => "policy",
        }
    }
}

impl FromStr for StackKind {
    type Err = Error;

    /// Accepts the document names and the tool names they stand for.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "DeclarativeTemplate" | "CloudFormation" | "Cloudformation" => {
                Ok(StackKind::DeclarativeTemplate)
            }
            "ProgrammaticIaC" | "CDK" | "Cdk" => Ok(StackKind::ProgrammaticIac),
            "GenericIaC" | "Terraform" => Ok(StackKind::GenericIac),
            "PolicyDocument" => Ok(StackKind::PolicyDocument),
            other => Err(Error::config(format!("unknown stack type '{other}'"))),
        }
    }
}

impl fmt::Display for StackKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Options that only apply to declarative-template stacks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateOptions {
    /// `Key=Value` parameter overrides
    pub parameters: Vec<String>,
    /// Capabilities acknowledged on the change set
    pub capabilities: Vec<String>,
    /// Explicit provider-side stack name
    pub stack_name: Option<String>,
}

/// An IaC deploy unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stack {
    /// Comma-separated alias list
    pub name: String,
    pub kind: StackKind,
    /// Template file or project directory
    pub path: PathBuf,
    /// Role assumed instead of the account's default role
    pub role_override_arn: Option<String>,
    /// Comma-separated region list
    pub region: Option<String>,
    /// Workspace name template (generic IaC only)
    pub workspace: Option<String>,
    pub template: TemplateOptions,
}

impl Stack {
    /// Create a stack with no overrides.
    pub fn new(name: impl Into<String>, kind: StackKind, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            kind,
            path: path.into(),
            role_override_arn: None,
            region: None,
            workspace: None,
            template: TemplateOptions::default(),
        }
    }

    /// The aliases this stack answers to.
    pub fn aliases(&self) -> Vec<&str> {
        split_list(&self.name)
    }

    /// The first alias, used where a single name is required.
    pub fn primary_name(&self) -> &str {
        self.aliases().first().copied().unwrap_or(self.name.as_str())
    }

    /// The regions this stack targets (empty when unset).
    pub fn regions(&self) -> Vec<&str> {
        self.region.as_deref().map(split_list).unwrap_or_default()
    }

    /// Copy of this stack bound to a single region.
    pub fn new_for_region(&self, region: impl Into<String>) -> Stack {
        Stack {
            region: Some(region.into()),
            ..self.clone()
        }
    }

    /// One stack per listed region, or the stack itself when at most one
    /// region is set.
    pub fn expand_regions(&self) -> Vec<Stack> {
        let regions = self.regions();
        if regions.len() <= 1 {
            return vec![match regions.first() {
                Some(region) => self.new_for_region(*region),
                None => self.clone(),
            }];
        }
        regions.into_iter().map(|r| self.new_for_region(r)).collect()
    }

    /// Restrict the alias list to the names in `filter`.
    ///
    /// Returns `None` when no alias survives. Matching is exact after
    /// trimming both sides.
    pub fn restricted_to(&self, filter: &[&str]) -> Option<Stack> {
        let kept: Vec<&str> = self
            .aliases()
            .into_iter()
            .filter(|alias| filter.contains(alias))
            .collect();

        if kept.is_empty() {
            return None;
        }

        Some(Stack {
            name: kept.join(","),
            ..self.clone()
        })
    }
}

impl fmt::Display for Stack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)?;
        if let Some(region) = &self.region {
            write!(f, " [{region}]")?;
        }
        Ok(())
    }
}

/// Split a comma-separated list, trimming entries and dropping empty ones.
pub fn split_list(list: &str) -> Vec<&str> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Keep the stacks whose alias list intersects the comma-separated `filter`,
/// each reduced to the matching aliases.
pub fn filter_stacks(stacks: &[Stack], filter: &str) -> Vec<Stack> {
    let wanted = split_list(filter);
    stacks
        .iter()
        .filter_map(|stack| stack.restricted_to(&wanted))
        .collect()
}
