use crate::task::Disease;
use crate::{PostprocessError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::info;

/// Merged artifacts a report is rendered from
#[derive(Debug, Clone)]
pub struct ReportInputs {
    pub summaries: PathBuf,
    pub samples: PathBuf,
    pub metadata: PathBuf,
}

/// Renders a per-disease anomaly report to an HTML file
pub trait ReportRenderer {
    fn render(&self, disease: Disease, inputs: &ReportInputs, output: &Path) -> Result<()>;
}

/// Renders a parameterised Quarto document with the `quarto` CLI
#[derive(Debug, Clone)]
pub struct QuartoRenderer {
    program: String,
    template: PathBuf,
}

impl QuartoRenderer {
    pub fn new(template: impl Into<PathBuf>) -> Self {
        Self {
            program: "quarto".to_string(),
            template: template.into(),
        }
    }

    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self, disease: Disease, inputs: &ReportInputs) -> Result<Command> {
        let mut cmd = Command::new(&self.program);
        cmd.arg("render").arg(&self.template);
        for (name, path) in [
            ("summary_file", &inputs.summaries),
            ("samples_file", &inputs.samples),
            ("metadata_file", &inputs.metadata),
        ] {
            let absolute = fs::canonicalize(path)?;
            cmd.arg("-P").arg(format!("{}:{}", name, absolute.display()));
        }
        cmd.arg("-P").arg(format!("disease:{}", disease.label()));
        Ok(cmd)
    }
}

impl ReportRenderer for QuartoRenderer {
    /// Quarto writes `<template stem>.html` beside the template; it is moved to `output`
    fn render(&self, disease: Disease, inputs: &ReportInputs, output: &Path) -> Result<()> {
        let status = self
            .command(disease, inputs)?
            .status()
            .map_err(|e| PostprocessError::Render(format!("failed to run {}: {}", self.program, e)))?;
        if !status.success() {
            return Err(PostprocessError::Render(format!(
                "{} render of {} for {} exited with {}",
                self.program,
                self.template.display(),
                disease,
                status
            )));
        }

        let rendered = self.template.with_extension("html");
        if let Some(parent) = output.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::rename(&rendered, output)?;
        info!(%disease, output = %output.display(), "rendered anomaly report");
        Ok(())
    }
}
