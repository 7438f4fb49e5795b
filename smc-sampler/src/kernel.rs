use crate::automaton::Automaton;
use crate::error::{Result, RuntimeError};
use smc_structs::config::RuntimeConfig;
use std::path::PathBuf;

const PLACEHOLDER_PREFIX: &str = "__SMC_";

/// Produces compilable kernel source for one model and property set.
pub trait KernelSource {
    fn generate(
        &self,
        config: &RuntimeConfig,
        automaton: &dyn Automaton,
        properties: &[String],
    ) -> Result<String>;
}

/// Source text used as is.
#[derive(Debug, Clone)]
pub struct StaticKernelSource(pub String);

impl KernelSource for StaticKernelSource {
    fn generate(&self, _: &RuntimeConfig, _: &dyn Automaton, _: &[String]) -> Result<String> {
        Ok(self.0.clone())
    }
}

/// Kernel template on disk with `__SMC_*__` placeholders.
#[derive(Debug, Clone)]
pub struct TemplateKernelSource {
    path: PathBuf,
}

impl TemplateKernelSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl KernelSource for TemplateKernelSource {
    fn generate(
        &self,
        config: &RuntimeConfig,
        automaton: &dyn Automaton,
        properties: &[String],
    ) -> Result<String> {
        let template = smc_utils::read_text(&self.path)
            .map_err(|e| RuntimeError::KernelGeneration(e.to_string()))?;
        render_template(&template, config, automaton, properties)
    }
}

pub fn render_template(
    template: &str,
    config: &RuntimeConfig,
    automaton: &dyn Automaton,
    properties: &[String],
) -> Result<String> {
    if properties.is_empty() {
        return Err(RuntimeError::KernelGeneration(
            "at least one property must be monitored".to_string(),
        ));
    }
    let source = template
        .replace("__SMC_ENTRY_POINT__", &config.entry_point)
        .replace("__SMC_NUM_PROPERTIES__", &properties.len().to_string())
        .replace(
            "__SMC_NUM_PARAMETERS__",
            &automaton.adaptation_branch_count().to_string(),
        )
        .replace("__SMC_MAX_PATH_LENGTH__", &config.max_path_length.to_string());
    if let Some(at) = source.find(PLACEHOLDER_PREFIX) {
        let name: String = source[at..]
            .chars()
            .take_while(|c| c.is_ascii_alphanumeric() || *c == '_')
            .collect();
        return Err(RuntimeError::KernelGeneration(format!(
            "unresolved placeholder {}",
            name
        )));
    }
    Ok(source)
}
