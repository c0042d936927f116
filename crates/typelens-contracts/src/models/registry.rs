use indexmap::IndexMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelSpec {
    pub name: String,
    pub provider: String,
    pub capabilities: Vec<String>,
    pub context_window: Option<u64>,
}

impl ModelSpec {
    pub fn supports(&self, capability: &str) -> bool {
        self.capabilities.iter().any(|item| item == capability)
    }
}

#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: IndexMap<String, ModelSpec>,
}

impl ModelRegistry {
    pub fn new(models: Option<IndexMap<String, ModelSpec>>) -> Self {
        Self {
            models: models.unwrap_or_else(default_models),
        }
    }

    pub fn get(&self, name: &str) -> Option<&ModelSpec> {
        self.models.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ModelSpec> {
        self.models.values()
    }

    pub fn by_capability(&self, capability: &str) -> Vec<ModelSpec> {
        self.models
            .values()
            .filter(|model| model.supports(capability))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, name: &str, capability: &str) -> Option<ModelSpec> {
        let model = self.get(name)?;
        if model.supports(capability) {
            return Some(model.clone());
        }
        None
    }
}

fn default_models() -> IndexMap<String, ModelSpec> {
    let mut map = IndexMap::new();

    let mut insert =
        |name: &str, provider: &str, capabilities: &[&str], context_window: Option<u64>| {
            map.insert(
                name.to_string(),
                ModelSpec {
                    name: name.to_string(),
                    provider: provider.to_string(),
                    capabilities: capabilities
                        .iter()
                        .map(|item| (*item).to_string())
                        .collect(),
                    context_window,
                },
            );
        };

    insert("dryrun-text-1", "dryrun", &["text", "vision"], Some(8192));
    insert("gpt-4", "openai", &["text"], Some(8192));
    insert("gpt-4o", "openai", &["text", "vision"], Some(128000));
    insert("gpt-4o-mini", "openai", &["text", "vision"], Some(128000));

    map
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_text_and_vision_tiers() {
        let registry = ModelRegistry::new(None);
        assert!(registry.ensure("gpt-4", "text").is_some());
        assert!(registry.ensure("gpt-4", "vision").is_none());
        assert!(registry.ensure("gpt-4o-mini", "vision").is_some());
    }

    #[test]
    fn by_capability_preserves_insertion_order() {
        let registry = ModelRegistry::new(None);
        let vision: Vec<String> = registry
            .by_capability("vision")
            .into_iter()
            .map(|spec| spec.name)
            .collect();
        assert_eq!(vision, vec!["dryrun-text-1", "gpt-4o", "gpt-4o-mini"]);
    }
}
