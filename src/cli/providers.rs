// src/cli/providers.rs — `shotsmith providers`: catalog overview

use super::Services;
use crate::provider::registry::ProviderRegistry;
use crate::provider::ProviderProfile;

pub fn list_providers(services: &Services) {
    println!(
        "{:<14} {:<28} {:<6} {:>7}  {:<7} {}",
        "ID", "NAME", "PROTO", "COST", "STATUS", "BEST FOR"
    );
    for profile in services.catalog.all() {
        println!("{}", format_row(profile, &services.registry));
    }
}

fn status(profile: &ProviderProfile, registry: &ProviderRegistry) -> &'static str {
    if !profile.api_available {
        "no api"
    } else if !profile.is_routable_image() {
        "n/a"
    } else if registry.available().contains(&profile.id) {
        if registry.has_editor(profile.id) {
            "ready+e"
        } else {
            "ready"
        }
    } else {
        "no key"
    }
}

fn format_row(profile: &ProviderProfile, registry: &ProviderRegistry) -> String {
    let proto = match profile.protocol {
        crate::provider::Protocol::Sync => "sync",
        crate::provider::Protocol::Queue => "queue",
    };
    format!(
        "{:<14} {:<28} {:<6} {:>7.3}  {:<7} {}",
        profile.id,
        crate::util::truncate_str(&profile.name, 28),
        proto,
        profile.cost_per_unit,
        status(profile, registry),
        profile.best_for.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::config::Config;
    use crate::provider::registry::ProviderKeys;
    use crate::provider::{ProviderCatalog, ProviderId};

    fn registry(catalog: &ProviderCatalog) -> ProviderRegistry {
        let keys = ProviderKeys {
            openai: Some("sk".into()),
            fal: None,
        };
        ProviderRegistry::from_config(&Config::default(), catalog, &keys)
    }

    #[test]
    fn test_status_column() {
        let catalog = ProviderCatalog::builtin().unwrap();
        let reg = registry(&catalog);
        let get = |id| catalog.require(id).unwrap();
        assert_eq!(status(get(ProviderId::GptImage), &reg), "ready+e");
        assert_eq!(status(get(ProviderId::Seedream), &reg), "no key");
        assert_eq!(status(get(ProviderId::Kling), &reg), "no api");
    }

    #[test]
    fn test_row_contains_id_and_cost() {
        let catalog = ProviderCatalog::builtin().unwrap();
        let reg = registry(&catalog);
        let row = format_row(catalog.require(ProviderId::GptImage).unwrap(), &reg);
        assert!(row.starts_with("gpt-image"));
        assert!(row.contains("sync"));
    }
}
