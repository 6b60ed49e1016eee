// src/compiler/template.rs — Deterministic prompt compiler (minijinja templates)
//
// Templates emit one fragment per line. Natural-language providers get the
// fragments joined as sentences; keyword providers get a comma list with
// weighted fixes.

use async_trait::async_trait;
use minijinja::{context, Environment};
use serde::Serialize;
use std::sync::Arc;

use super::context::BriefContext;
use super::knowledge::{KnowledgeBase, Tier};
use super::{CompiledPrompt, PromptCompiler};
use crate::core::types::{AuditReport, CompileMode};
use crate::infra::errors::ShotsmithError;
use crate::provider::{ProviderProfile, PromptSyntax};

const NATURAL: &str = r#"
{{ subject }}
{% for c in characters %}
{{ c.name }}{% if c.description %}, {{ c.description }}{% endif %}{% if c.wardrobe %}, wearing {{ c.wardrobe }}{% endif %}
{% endfor %}
{% for o in objects %}
Featuring {{ o.name }}{% if o.description %}: {{ o.description }}{% endif %}
{% endfor %}
{% if setting %}Setting: {{ setting }}{% endif %}
{% if time_of_day %}Time of day: {{ time_of_day }}{% endif %}
{% if lighting %}Lighting: {{ lighting }}{% endif %}
{% if mood %}Mood: {{ mood }}{% endif %}
{% if framing %}Framing: {{ framing }}{% endif %}
{% if camera %}Camera: {{ camera }}{% endif %}
{% if style %}Style: {{ style }}{% endif %}
{% if text %}The image must show the exact text "{{ text }}", spelled correctly and clearly legible{% endif %}
{% for block in knowledge %}
{{ block }}
{% endfor %}
"#;

const KEYWORDS: &str = r#"
{{ subject }}
{% for c in characters %}
{{ c.name }}{% if c.description %} ({{ c.description }}){% endif %}
{% if c.wardrobe %}{{ c.wardrobe }}{% endif %}
{% endfor %}
{% for o in objects %}
{{ o.name }}
{% endfor %}
{% if setting %}{{ setting }}{% endif %}
{% if time_of_day %}{{ time_of_day }}{% endif %}
{% if lighting %}{{ lighting }}{% endif %}
{% if mood %}{{ mood }} mood{% endif %}
{% if framing %}{{ framing }}{% endif %}
{% if camera %}{{ camera }}{% endif %}
{% if style %}{{ style }}{% endif %}
{% if text %}text "{{ text }}"{% endif %}
"#;

const REFINE_NATURAL: &str = r#"
{{ previous }}
{% if keep %}Keep the {{ keep | join(", ") }} unchanged{% endif %}
{% for fix in adjustments %}
{{ fix }}
{% endfor %}
"#;

const REFINE_KEYWORDS: &str = r#"
{{ previous }}
{% for fix in adjustments %}
({{ fix }}:1.3)
{% endfor %}
"#;

/// Dimensions at or above this score are called out as things to keep.
const KEEP_MIN_SCORE: f32 = 8.0;

#[derive(Serialize)]
struct Person<'a> {
    name: &'a str,
    description: &'a str,
    wardrobe: &'a str,
}

/// Prompt compiler that never calls a model.
pub struct TemplateCompiler {
    env: Environment<'static>,
    knowledge: Arc<KnowledgeBase>,
}

impl TemplateCompiler {
    pub fn new(knowledge: Arc<KnowledgeBase>) -> Result<Self, ShotsmithError> {
        let mut env = Environment::new();
        env.set_trim_blocks(true);
        env.set_lstrip_blocks(true);
        for (name, source) in [
            ("natural", NATURAL),
            ("keywords", KEYWORDS),
            ("refine_natural", REFINE_NATURAL),
            ("refine_keywords", REFINE_KEYWORDS),
        ] {
            env.add_template(name, source).map_err(template_error)?;
        }
        Ok(Self { env, knowledge })
    }

    fn render(&self, name: &str, ctx: minijinja::Value) -> Result<String, ShotsmithError> {
        self.env
            .get_template(name)
            .and_then(|t| t.render(ctx))
            .map_err(template_error)
    }

    fn fresh(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        let blocks = self.knowledge.select(profile.id, &brief.traits());
        // Core rules are for prompt writers; only provider and pack advice is
        // spliced into the image prompt itself.
        let spliced: Vec<String> = blocks
            .iter()
            .filter(|b| b.tier != Tier::Core)
            .map(|b| flatten(&b.text))
            .collect();

        let characters: Vec<Person> = brief
            .characters
            .iter()
            .map(|c| Person {
                name: &c.name,
                description: &c.description,
                wardrobe: &c.wardrobe,
            })
            .collect();
        let objects: Vec<Person> = brief
            .objects
            .iter()
            .map(|o| Person {
                name: &o.name,
                description: &o.description,
                wardrobe: "",
            })
            .collect();

        let setting = join_nonempty(&[brief.scene.description.as_str(), brief.scene.location.as_str()]);
        let style = join_nonempty(&[brief.shot.style.as_str(), brief.project.style.as_str()]);
        let text = brief
            .shot
            .text
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty());

        let (template, knowledge) = match profile.prompt_syntax {
            PromptSyntax::Natural => ("natural", spliced),
            PromptSyntax::Keywords => ("keywords", Vec::new()),
        };
        let used: Vec<String> = match profile.prompt_syntax {
            PromptSyntax::Natural => blocks.into_iter().map(|b| b.name).collect(),
            PromptSyntax::Keywords => Vec::new(),
        };

        let rendered = self.render(
            template,
            context! {
                subject => brief.shot.description.trim(),
                characters => characters,
                objects => objects,
                setting => setting,
                time_of_day => brief.scene.time_of_day.trim(),
                lighting => brief.scene.lighting.trim(),
                mood => brief.scene.mood.trim(),
                framing => brief.shot.framing.trim(),
                camera => brief.shot.camera.trim(),
                style => style,
                text => text,
                knowledge => knowledge,
            },
        )?;

        Ok(CompiledPrompt {
            text: finish(&rendered, profile.prompt_syntax),
            mode: CompileMode::Fresh,
            knowledge: used,
        })
    }
}

#[async_trait]
impl PromptCompiler for TemplateCompiler {
    fn name(&self) -> &str {
        "template"
    }

    fn makes_paid_calls(&self) -> bool {
        false
    }

    async fn compile(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        self.fresh(brief, profile)
    }

    async fn refine(
        &self,
        brief: &BriefContext,
        profile: &ProviderProfile,
        previous_prompt: &str,
        audit: &AuditReport,
    ) -> Result<CompiledPrompt, ShotsmithError> {
        if previous_prompt.trim().is_empty() {
            let mut compiled = self.fresh(brief, profile)?;
            compiled.mode = CompileMode::Refine;
            return Ok(compiled);
        }

        let keep: Vec<String> = audit
            .strong_dimensions(KEEP_MIN_SCORE)
            .into_iter()
            .map(|(name, _)| name.replace('_', " "))
            .collect();
        let adjustments: Vec<&str> = audit
            .prompt_adjustments
            .iter()
            .map(|a| a.trim())
            .filter(|a| !a.is_empty() && !previous_prompt.contains(*a))
            .collect();

        let template = match profile.prompt_syntax {
            PromptSyntax::Natural => "refine_natural",
            PromptSyntax::Keywords => "refine_keywords",
        };
        let rendered = self.render(
            template,
            context! {
                previous => previous_prompt.trim(),
                keep => keep,
                adjustments => adjustments,
            },
        )?;

        Ok(CompiledPrompt {
            text: finish(&rendered, profile.prompt_syntax),
            mode: CompileMode::Refine,
            knowledge: Vec::new(),
        })
    }
}

fn template_error(e: minijinja::Error) -> ShotsmithError {
    ShotsmithError::Other(anyhow::Error::new(e).context("prompt template failed"))
}

fn join_nonempty(parts: &[&str]) -> String {
    parts
        .iter()
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Collapse a markdown block to one line.
fn flatten(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Turn the one-fragment-per-line template output into the final prompt.
fn finish(rendered: &str, syntax: PromptSyntax) -> String {
    let lines = rendered.lines().map(str::trim).filter(|l| !l.is_empty());
    match syntax {
        PromptSyntax::Natural => lines
            .map(|l| {
                if l.ends_with(['.', '!', '?', '"']) {
                    l.to_string()
                } else {
                    format!("{}.", l)
                }
            })
            .collect::<Vec<_>>()
            .join(" "),
        PromptSyntax::Keywords => lines
            .map(|l| l.trim_end_matches([',', '.']))
            .collect::<Vec<_>>()
            .join(", "),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::context::CharacterRef;
    use crate::core::types::{DimensionScore, Verdict};
    use crate::provider::{ProviderCatalog, ProviderId};
    use std::collections::BTreeMap;

    fn compiler() -> TemplateCompiler {
        TemplateCompiler::new(Arc::new(KnowledgeBase::bundled())).unwrap()
    }

    fn profile(id: ProviderId, syntax: PromptSyntax) -> ProviderProfile {
        let mut p = ProviderCatalog::builtin().unwrap().require(id).unwrap().clone();
        p.prompt_syntax = syntax;
        p
    }

    fn noir_brief() -> BriefContext {
        let mut brief = BriefContext::from_description("wide establishing shot, neo-noir, no characters");
        brief.scene.location = "rain-soaked harbor district".into();
        brief.scene.lighting = "sodium vapor street lamps".into();
        brief
    }

    fn audit() -> AuditReport {
        let mut dimensions = BTreeMap::new();
        dimensions.insert(
            "composition".to_string(),
            DimensionScore {
                score: 9.0,
                notes: String::new(),
            },
        );
        dimensions.insert(
            "lighting".to_string(),
            DimensionScore {
                score: 5.0,
                notes: "flat".into(),
            },
        );
        AuditReport {
            overall_score: 80.0,
            recommendation: Verdict::Refine,
            dimensions,
            issues: vec!["lighting is flat".into()],
            prompt_adjustments: vec!["add a hard rim light from behind the subject".into()],
            failure_patterns: vec![],
            summary: String::new(),
            consensus: None,
        }
    }

    #[tokio::test]
    async fn test_natural_compile_splices_knowledge() {
        let c = compiler();
        let out = c
            .compile(&noir_brief(), &profile(ProviderId::Seedream, PromptSyntax::Natural))
            .await
            .unwrap();
        assert_eq!(out.mode, CompileMode::Fresh);
        assert!(out.text.starts_with("wide establishing shot, neo-noir, no characters."));
        assert!(out.text.contains("Setting: rain-soaked harbor district."));
        assert!(out.text.contains("Lighting: sodium vapor street lamps."));
        assert!(out.text.contains("foreground, midground, background"));
        assert!(!out.text.contains('\n'));
        assert_eq!(out.knowledge, vec!["core", "seedream", "wide_shot", "lighting"]);
    }

    #[tokio::test]
    async fn test_keyword_compile() {
        let c = compiler();
        let mut brief = noir_brief();
        brief.characters.push(CharacterRef {
            name: "Mara".into(),
            description: "detective in her 40s".into(),
            wardrobe: "grey trench coat".into(),
            ..Default::default()
        });
        let out = c
            .compile(&brief, &profile(ProviderId::FluxPro, PromptSyntax::Keywords))
            .await
            .unwrap();
        assert!(out.text.contains("Mara (detective in her 40s), grey trench coat"));
        assert!(out.text.contains("sodium vapor street lamps"));
        assert!(!out.text.contains("Setting:"));
        assert!(out.knowledge.is_empty());
    }

    #[tokio::test]
    async fn test_required_text_is_quoted() {
        let c = compiler();
        let mut brief = BriefContext::from_description("diner storefront at night");
        brief.shot.text = Some("EAT".into());
        let out = c
            .compile(&brief, &profile(ProviderId::Ideogram, PromptSyntax::Natural))
            .await
            .unwrap();
        assert!(out.text.contains("exact text \"EAT\""));
        assert!(out.knowledge.contains(&"typography".to_string()));
    }

    #[tokio::test]
    async fn test_refine_anchors_on_previous_prompt() {
        let c = compiler();
        let p = profile(ProviderId::Seedream, PromptSyntax::Natural);
        let out = c
            .refine(&noir_brief(), &p, "A harbor at night.", &audit())
            .await
            .unwrap();
        assert_eq!(out.mode, CompileMode::Refine);
        assert!(out.text.starts_with("A harbor at night."));
        assert!(out.text.contains("Keep the composition unchanged."));
        assert!(out.text.contains("add a hard rim light from behind the subject."));
    }

    #[tokio::test]
    async fn test_refine_skips_fixes_already_present() {
        let c = compiler();
        let p = profile(ProviderId::Seedream, PromptSyntax::Natural);
        let previous = "A harbor at night. add a hard rim light from behind the subject.";
        let out = c.refine(&noir_brief(), &p, previous, &audit()).await.unwrap();
        assert_eq!(out.text.matches("rim light").count(), 1);
    }

    #[tokio::test]
    async fn test_refine_keywords_weights_fixes() {
        let c = compiler();
        let p = profile(ProviderId::FluxPro, PromptSyntax::Keywords);
        let out = c.refine(&noir_brief(), &p, "harbor, night", &audit()).await.unwrap();
        assert_eq!(
            out.text,
            "harbor, night, (add a hard rim light from behind the subject:1.3)"
        );
    }

    #[test]
    fn test_template_compiler_is_free() {
        assert!(!compiler().makes_paid_calls());
    }

    #[test]
    fn test_finish_natural_and_keywords() {
        assert_eq!(finish("a\n\n b. \n", PromptSyntax::Natural), "a. b.");
        assert_eq!(finish("a,\nb\n", PromptSyntax::Keywords), "a, b");
    }
}
