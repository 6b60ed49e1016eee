// src/cli/route.rs — `shotsmith route`: explain the router's choice for a brief

use std::path::Path;

use super::Services;
use crate::compiler::context::BriefContext;
use crate::provider::router::{Candidate, RouteOptions};

pub fn show_route(services: &Services, brief_path: &Path, all: bool) -> anyhow::Result<()> {
    let brief = BriefContext::load(brief_path)?;
    let traits = brief.traits();

    let available = if all {
        services.catalog.image_providers().map(|p| p.id).collect()
    } else {
        services.registry.available()
    };
    let ranked = services.router.rank(&traits, &RouteOptions::new(available));
    if ranked.is_empty() {
        anyhow::bail!("no eligible image provider (try --all to rank the whole catalog)");
    }

    println!("shot {}: {}", brief.shot_id(), traits.tags().join(", "));
    for (i, candidate) in ranked.iter().enumerate() {
        println!("{}", format_candidate(i, candidate));
    }
    Ok(())
}

fn format_candidate(rank: usize, c: &Candidate) -> String {
    let label = match rank {
        0 => "primary",
        1 | 2 => "alt",
        _ => "",
    };
    let why = if c.rationale.is_empty() {
        "baseline".to_string()
    } else {
        c.rationale.join("; ")
    };
    format!("{:>2}. {:<14} {:>4} {:<8} {}", rank + 1, c.provider, c.score, label, why)
}
