use aiq_skills::Skill;

const SKILLS_HEADER: &str = "## Available Skills (Context Information)\n\
IMPORTANT: Skills are NOT tools. They provide context and guidance on how to use the available tools.\n\
Do NOT call Skills as tools. Use the built-in tools (execute_sql, execute_command, http_request, file_operations, etc.) to accomplish tasks described in Skills.\n\n\
CRITICAL: When Skills contain bash commands or code blocks:\n\
- If the user requests an ACTION (like 'install', 'setup', 'configure', 'run'), you MUST EXECUTE the commands using execute_command tool, NOT just show them to the user.\n\
- Execute commands step by step as described in the Skill, checking results before proceeding.\n\
- Only show commands to the user if they explicitly ask for instructions or if execution fails and you need to explain.\n\
- For installation/setup tasks: Execute the commands automatically, don't just provide instructions.\n\n";

/// Builds the system prompt from a fixed base and a set of skills.
#[derive(Debug, Clone)]
pub struct SystemPromptBuilder {
    base: String,
}

impl SystemPromptBuilder {
    pub fn new(base: impl Into<String>) -> Self {
        Self { base: base.into() }
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    /// The base alone when `skills` is empty, otherwise the base followed by
    /// the skills section.
    pub fn build(&self, skills: &[Skill]) -> String {
        if skills.is_empty() {
            return self.base.clone();
        }

        let mut prompt = String::with_capacity(self.base.len() + SKILLS_HEADER.len() + 512);
        prompt.push_str(&self.base);
        prompt.push_str("\n\n");
        prompt.push_str(SKILLS_HEADER);
        for skill in skills {
            prompt.push_str(&format_skill(skill));
        }
        prompt
    }
}

fn format_skill(skill: &Skill) -> String {
    let mut parts = vec![
        format!("### Skill: {} (Context Only - NOT a Tool)", skill.name),
        format!("**Description**: {}", skill.description),
        "**Note**: This is context information. Use the available tools to accomplish tasks described below.\n".to_string(),
    ];
    if !skill.content.is_empty() {
        parts.push(skill.content.clone());
    }
    parts.join("\n") + "\n\n"
}
