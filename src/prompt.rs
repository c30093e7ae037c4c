use std::collections::BTreeMap;

/// Values substituted into `{key}` placeholders of instruction templates.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateVars {
    data: BTreeMap<String, String>,
}

impl TemplateVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.data.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.data.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Replace `{key}` placeholders in the template with values from `vars`.
///
/// Unknown placeholders are left as-is.
pub fn render(template: &str, vars: &TemplateVars) -> String {
    let mut rendered = template.to_string();
    for (key, value) in &vars.data {
        let placeholder = format!("{{{}}}", key);
        rendered = rendered.replace(&placeholder, value);
    }
    rendered
}
