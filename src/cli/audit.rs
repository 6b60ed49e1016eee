// src/cli/audit.rs — `shotsmith audit`: score an existing image against a brief

use std::path::Path;

use super::Services;
use crate::compiler::context::BriefContext;
use crate::provider::GenerationResult;

pub async fn run_audit(services: &Services, image: &Path, brief_path: &Path) -> anyhow::Result<()> {
    let brief = BriefContext::load(brief_path)?;
    let bytes = tokio::fs::read(image)
        .await
        .map_err(|e| anyhow::anyhow!("{}: {}", image.display(), e))?;
    let mime = crate::util::mime_from_path(&image.to_string_lossy());
    let result = GenerationResult::new(bytes, mime, image.display().to_string(), 0);

    let auditor = services.auditor()?;
    let report = auditor.audit(&result, &brief).await?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
