use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Function,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: String,
}

impl FunctionCall {
    /// Returns the tool name only once a non-empty value has arrived.
    pub fn resolved_name(&self) -> Option<&str> {
        self.name.as_deref().filter(|name| !name.trim().is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: Some(text.into()),
            function_call: None,
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: Some(text.into()),
            function_call: None,
            name: None,
        }
    }

    /// Empty assistant message that stream fragments are merged into.
    pub fn empty_assistant() -> Self {
        Self {
            role: Role::Assistant,
            content: None,
            function_call: None,
            name: None,
        }
    }

    pub fn assistant_text(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: Some(text.into()),
            function_call: None,
            name: None,
        }
    }

    pub fn function_result(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Function,
            content: Some(content.into()),
            function_call: None,
            name: Some(name.into()),
        }
    }

    pub fn text(&self) -> &str {
        self.content.as_deref().unwrap_or("")
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FunctionCallMode {
    Auto,
    None,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Conversation {
    pub id: String,
    pub name: String,
    pub messages: Vec<Message>,
    pub model: String,
    pub temperature: f32,
    pub prompt: String,
    #[serde(default)]
    pub functions: Vec<FunctionDefinition>,
    #[serde(default)]
    pub function_call: Option<FunctionCallMode>,
}

impl Conversation {
    pub fn new(
        id: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
        temperature: f32,
    ) -> Self {
        Self {
            id: id.into(),
            name: "New Conversation".to_string(),
            messages: Vec::new(),
            model: model.into(),
            temperature,
            prompt: prompt.into(),
            functions: Vec::new(),
            function_call: None,
        }
    }

    /// Advertise the built-in `run_code`/`run_shell` tools to the model.
    pub fn with_code_interpreter(mut self) -> Self {
        self.functions = default_functions();
        self.function_call = Some(FunctionCallMode::Auto);
        self
    }

    pub fn tools_enabled(&self) -> bool {
        !self.functions.is_empty()
    }

    pub fn last_message(&self) -> Option<&Message> {
        self.messages.last()
    }
}

pub fn default_functions() -> Vec<FunctionDefinition> {
    vec![
        FunctionDefinition {
            name: "run_code".to_string(),
            description: "Execute Python code in a persistent REPL-like session and return its output.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "code": { "type": "string", "example": "print('Hello, World!')" }
                },
                "required": ["code"]
            }),
        },
        FunctionDefinition {
            name: "run_shell".to_string(),
            description: "Run a shell command and return its output.".to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "command": { "type": "string", "example": "ls -la" }
                },
                "required": ["command"]
            }),
        },
    ]
}
