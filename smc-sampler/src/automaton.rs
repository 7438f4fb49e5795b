use crate::error::{Result, RuntimeError};
use smc_structs::core::{CommandDescription, ModelDescription, VariableDescription};
use std::collections::{BTreeMap, BTreeSet};

const ADAPT_PREFIX: &str = "adapt_";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Variable {
    pub name: String,
    pub min_value: i32,
    pub max_value: i32,
    pub init_value: i32,
}

impl Variable {
    fn from_description(desc: &VariableDescription) -> Result<Self> {
        if desc.min_value > desc.max_value {
            return Err(RuntimeError::InvalidModel(format!(
                "variable '{}' has empty range [{}, {}]",
                desc.name, desc.min_value, desc.max_value
            )));
        }
        let init_value = desc.init_value.unwrap_or(desc.min_value);
        if !(desc.min_value..=desc.max_value).contains(&init_value) {
            return Err(RuntimeError::InvalidModel(format!(
                "variable '{}' starts at {} outside [{}, {}]",
                desc.name, init_value, desc.min_value, desc.max_value
            )));
        }
        Ok(Self {
            name: desc.name.clone(),
            min_value: desc.min_value,
            max_value: desc.max_value,
            init_value,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GuardedCommand {
    pub module: String,
    pub label: String,
    pub guard: String,
    pub updates: Vec<String>,
}

impl From<&CommandDescription> for GuardedCommand {
    fn from(desc: &CommandDescription) -> Self {
        Self {
            module: desc.module.clone(),
            label: desc.label.clone(),
            guard: desc.guard.clone(),
            updates: desc.updates.clone(),
        }
    }
}

/// Choice point whose branch probabilities are free parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdaptCommand {
    pub label: String,
    pub branches: Vec<GuardedCommand>,
    pub variable: Option<Variable>,
}

impl AdaptCommand {
    /// One parameter per value of the bound variable, or a single one when unbound.
    pub fn branch_count(&self) -> usize {
        match &self.variable {
            Some(var) => (var.max_value.max(-1) + 1) as usize,
            None => 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Plain(GuardedCommand),
    Synchronized {
        label: String,
        commands: Vec<GuardedCommand>,
    },
    Adapt(AdaptCommand),
}

impl Command {
    pub fn adaptation_branches(&self) -> usize {
        match self {
            Command::Adapt(adapt) => adapt.branch_count(),
            _ => 0,
        }
    }
}

/// The parts of a model the sampling runtime needs: its commands and how many
/// adaptation parameters they expose.
pub trait Automaton {
    fn variables(&self) -> &[Variable];
    fn command_count(&self) -> usize;
    fn command(&self, index: usize) -> Option<&Command>;

    fn adaptation_branch_count(&self) -> usize {
        (0..self.command_count())
            .filter_map(|i| self.command(i))
            .map(Command::adaptation_branches)
            .sum()
    }
}

/// Groups labelled commands: `adapt_<label>_<branch>` into adaptation
/// commands, other labels into synchronised commands. The label ends at the
/// first `_` after the prefix; the branch is any remaining text.
#[derive(Debug, Default)]
pub struct CommandBuilder {
    plain: Vec<GuardedCommand>,
    synchronized: BTreeMap<String, Vec<GuardedCommand>>,
    adapt: BTreeMap<String, Vec<(String, GuardedCommand)>>,
}

impl CommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, desc: &CommandDescription) -> Result<()> {
        let command = GuardedCommand::from(desc);
        if let Some(rest) = desc.label.strip_prefix(ADAPT_PREFIX) {
            let (label, branch) = rest.split_once('_').unwrap_or((rest, ""));
            if label.is_empty() {
                return Err(RuntimeError::InvalidModel(format!(
                    "adaptation label '{}' is not of the form {}<label>_<branch>",
                    desc.label, ADAPT_PREFIX
                )));
            }
            let branches = self.adapt.entry(label.to_string()).or_default();
            if branches.iter().any(|(name, _)| name == branch) {
                return Err(RuntimeError::InvalidModel(format!(
                    "duplicate adaptation branch '{}'",
                    desc.label
                )));
            }
            branches.push((branch.to_string(), command));
        } else if desc.label.is_empty() {
            self.plain.push(command);
        } else {
            self.synchronized
                .entry(desc.label.clone())
                .or_default()
                .push(command);
        }
        Ok(())
    }

    pub fn build(self, variables: &[Variable]) -> Vec<Command> {
        let mut commands: Vec<Command> = self.plain.into_iter().map(Command::Plain).collect();
        commands.extend(
            self.synchronized
                .into_iter()
                .map(|(label, commands)| Command::Synchronized { label, commands }),
        );
        commands.extend(self.adapt.into_iter().map(|(label, branches)| {
            let prefix = format!("{}{}_", ADAPT_PREFIX, label);
            let variable = variables
                .iter()
                .find(|v| v.name.starts_with(&prefix))
                .cloned();
            Command::Adapt(AdaptCommand {
                label,
                branches: branches.into_iter().map(|(_, command)| command).collect(),
                variable,
            })
        }));
        commands
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Model {
    variables: Vec<Variable>,
    commands: Vec<Command>,
}

impl Model {
    pub fn from_description(desc: &ModelDescription) -> Result<Self> {
        let mut names = BTreeSet::new();
        let variables = desc
            .variables
            .iter()
            .map(|v| {
                if !names.insert(v.name.as_str()) {
                    return Err(RuntimeError::InvalidModel(format!(
                        "variable '{}' declared twice",
                        v.name
                    )));
                }
                Variable::from_description(v)
            })
            .collect::<Result<Vec<_>>>()?;
        let mut builder = CommandBuilder::new();
        for command in desc.commands.iter() {
            builder.add(command)?;
        }
        let commands = builder.build(&variables);
        Ok(Self {
            variables,
            commands,
        })
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }
}

impl Automaton for Model {
    fn variables(&self) -> &[Variable] {
        &self.variables
    }

    fn command_count(&self) -> usize {
        self.commands.len()
    }

    fn command(&self, index: usize) -> Option<&Command> {
        self.commands.get(index)
    }
}
