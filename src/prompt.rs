//! Prompt Builder (§2, §6): a pure function over task fields, recent
//! progress, codebase patterns, and PRD context, rendered through a small
//! `{{var}}` / `{{#if var}}...{{/if}}` / `{{!-- comment --}}` template
//! subset. Generalizes the teacher's `ITERATION_PROMPT` constant, which used
//! bare `.replace()` calls with no conditionals.

use std::collections::HashMap;

pub const DEFAULT_TEMPLATE: &str = r#"{{!-- rendered once per iteration --}}
You are working on task {{taskId}}: {{taskTitle}}

{{#if taskDescription}}
Description:
{{taskDescription}}
{{/if}}

{{#if acceptanceCriteria}}
Acceptance criteria:
{{acceptanceCriteria}}
{{/if}}

{{#if dependsOn}}
This task depends on: {{dependsOn}}
{{/if}}

{{#if recentProgress}}
Recent progress on this session:
{{recentProgress}}
{{/if}}

{{#if codebasePatterns}}
Observed codebase patterns to follow:
{{codebasePatterns}}
{{/if}}

{{#if prdContent}}
Project context ({{prdName}}):
{{prdContent}}
{{/if}}

{{#if selectionReason}}
Why this task was selected now: {{selectionReason}}
{{/if}}

When the task is fully done, emit the literal marker <promise>COMPLETE</promise>
on its own line.
"#;

#[derive(Debug, Default, Clone)]
pub struct PromptContext {
    pub vars: HashMap<String, String>,
}

impl PromptContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: &str, value: impl Into<String>) -> Self {
        self.vars.insert(key.to_string(), value.into());
        self
    }

    pub fn set_opt(self, key: &str, value: Option<impl Into<String>>) -> Self {
        match value {
            Some(v) => self.set(key, v),
            None => self,
        }
    }
}

/// Render `template` against `ctx`. Unknown variables render as empty
/// strings; `{{#if var}}` blocks are emitted only when `var` is present and
/// non-empty in `ctx`. Comments (`{{!-- ... --}}`) are stripped.
pub fn render(template: &str, ctx: &PromptContext) -> String {
    let without_comments = strip_comments(template);
    let with_conditionals = render_conditionals(&without_comments, ctx);
    substitute_vars(&with_conditionals, ctx)
}

fn strip_comments(template: &str) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{!--") {
        out.push_str(&rest[..start]);
        match rest[start..].find("--}}") {
            Some(end) => rest = &rest[start + end + "--}}".len()..],
            None => {
                rest = "";
                break;
            }
        }
    }
    out.push_str(rest);
    out
}

fn render_conditionals(template: &str, ctx: &PromptContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let Some(start) = rest.find("{{#if ") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after_tag = &rest[start + "{{#if ".len()..];
        let Some(close) = after_tag.find("}}") else {
            out.push_str(&rest[start..]);
            break;
        };
        let var = after_tag[..close].trim();
        let body_start = &after_tag[close + 2..];
        let Some(end_tag) = body_start.find("{{/if}}") else {
            out.push_str(&rest[start..]);
            break;
        };
        let body = &body_start[..end_tag];
        let truthy = ctx.vars.get(var).map(|v| !v.is_empty()).unwrap_or(false);
        if truthy {
            out.push_str(&render_conditionals(body, ctx));
        }
        rest = &body_start[end_tag + "{{/if}}".len()..];
    }
    out
}

fn substitute_vars(template: &str, ctx: &PromptContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    loop {
        let Some(start) = rest.find("{{") else {
            out.push_str(rest);
            break;
        };
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find("}}") else {
            out.push_str(&rest[start..]);
            break;
        };
        let var = after[..end].trim();
        if let Some(value) = ctx.vars.get(var) {
            out.push_str(value);
        }
        rest = &after[end + 2..];
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substitutes_simple_variable() {
        let ctx = PromptContext::new().set("taskId", "T1").set("taskTitle", "Add login");
        let rendered = render("Task {{taskId}}: {{taskTitle}}", &ctx);
        assert_eq!(rendered, "Task T1: Add login");
    }

    #[test]
    fn conditional_block_omitted_when_var_absent() {
        let ctx = PromptContext::new().set("taskId", "T1");
        let rendered = render("before{{#if notes}} {{notes}} {{/if}}after", &ctx);
        assert_eq!(rendered, "beforeafter");
    }

    #[test]
    fn conditional_block_rendered_when_var_present() {
        let ctx = PromptContext::new().set("notes", "be careful");
        let rendered = render("{{#if notes}}Notes: {{notes}}{{/if}}", &ctx);
        assert_eq!(rendered, "Notes: be careful");
    }

    #[test]
    fn comments_are_stripped() {
        let rendered = render("{{!-- hidden --}}visible", &PromptContext::new());
        assert_eq!(rendered, "visible");
    }

    #[test]
    fn default_template_renders_without_panicking() {
        let ctx = PromptContext::new().set("taskId", "T1").set("taskTitle", "Do thing");
        let rendered = render(DEFAULT_TEMPLATE, &ctx);
        assert!(rendered.contains("T1"));
        assert!(rendered.contains("<promise>COMPLETE</promise>"));
    }
}
