#![allow(dead_code)]

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tempfile::TempDir;

use sous_knowledge::config::{parse_config, Config};
use sous_knowledge::embedding::EmbeddingProvider;
use sous_knowledge::error::{KnowledgeError, Result};
use sous_knowledge::jobs::ProviderFactory;
use sous_knowledge::llm::{LlmClient, LlmRequest, LlmResponse};
use sous_knowledge::models::Credentials;
use sous_knowledge::KnowledgeService;

pub const INTELLIGENCE_JSON: &str = r#"{
    "project_overview": {"name": "shop", "purpose": "sells things", "architecture_pattern": "layered"},
    "entry_points": [{"file": "main.py", "type": "python_main", "purpose": "start the app", "how_to_run": "python main.py", "dependencies": []}],
    "data_flows": [],
    "key_modules": [],
    "external_integrations": [],
    "development_setup": {"install_commands": [], "run_commands": ["python main.py"], "build_commands": [], "test_commands": []},
    "common_patterns": []
}"#;

/// Letter-frequency embeddings, with one constant dimension so no vector
/// is zero. Any text containing `POISON` fails permanently.
pub struct FakeEmbedder {
    pub calls: Mutex<usize>,
}

impl FakeEmbedder {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(0),
        }
    }
}

pub fn letter_vector(text: &str) -> Vec<f32> {
    let mut v = vec![0.0f32; 27];
    for c in text.to_lowercase().chars() {
        if c.is_ascii_lowercase() {
            v[(c as u8 - b'a') as usize] += 1.0;
        }
    }
    v[26] = 0.5;
    v
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedder {
    fn model_name(&self) -> &str {
        "fake-letters"
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        *self.calls.lock().unwrap() += 1;
        if texts.iter().any(|t| t.contains("POISON")) {
            return Err(KnowledgeError::external("embedding", "poisoned batch", false));
        }
        Ok(texts.iter().map(|t| letter_vector(t)).collect())
    }
}

/// A seeded project, an empty content root and a service wired to fakes.
pub struct Harness {
    pub tmp: TempDir,
    pub project: PathBuf,
    pub content_root: PathBuf,
    pub embedder: Arc<FakeEmbedder>,
    pub llm: Arc<RoutingLlm>,
    pub service: KnowledgeService,
}

/// Answers requests for `analysis-model` with `analysis_reply` and
/// everything else with `chat_reply`.
pub struct RoutingLlm {
    pub analysis_reply: String,
    pub chat_reply: String,
    pub requests: Mutex<Vec<LlmRequest>>,
}

impl RoutingLlm {
    pub fn chat_requests(&self) -> Vec<LlmRequest> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.model == "chat-model")
            .cloned()
            .collect()
    }
}

#[async_trait]
impl LlmClient for RoutingLlm {
    async fn complete(&self, request: &LlmRequest) -> Result<LlmResponse> {
        self.requests.lock().unwrap().push(request.clone());
        let text = if request.model == "analysis-model" {
            self.analysis_reply.clone()
        } else {
            self.chat_reply.clone()
        };
        Ok(LlmResponse {
            text,
            model: request.model.clone(),
            input_tokens: 100,
            output_tokens: 20,
            ..Default::default()
        })
    }
}

struct HarnessProviders {
    embedder: Arc<FakeEmbedder>,
    llm: Arc<RoutingLlm>,
}

impl ProviderFactory for HarnessProviders {
    fn embedder(
        &self,
        _config: &Config,
        _credentials: &Credentials,
    ) -> Result<Arc<dyn EmbeddingProvider>> {
        Ok(self.embedder.clone())
    }

    fn llm(&self, _config: &Config, _credentials: &Credentials) -> Result<Arc<dyn LlmClient>> {
        Ok(self.llm.clone())
    }
}

pub fn test_config(content_root: &Path) -> Config {
    parse_config(&format!(
        r#"
[content]
root = "{}"

[chunking]
window_tokens = 40
overlap_tokens = 8
tokenizer = "chars"

[embedding]
batch_size = 1
max_retries = 0
retry_base_delay_ms = 1

[llm]
analysis_model = "analysis-model"
chat_model = "chat-model"

[retrieval]
top_k = 3
"#,
        content_root.display()
    ))
    .unwrap()
}

pub fn write_file(root: &Path, rel: &str, content: &str) {
    let path = root.join(rel);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

/// A small project named `shop` with Python sources and a README.
pub fn seed_project(root: &Path) {
    write_file(
        root,
        "main.py",
        "from billing import charge\n\nif __name__ == '__main__':\n    charge(42)\n",
    );
    write_file(
        root,
        "billing.py",
        "def charge(amount):\n    return amount * 100\n\ndef refund(amount):\n    return -amount\n",
    );
    write_file(
        root,
        "phone.py",
        "def format_phone(number):\n    digits = ''.join(c for c in number if c.isdigit())\n    return '(' + digits[:3] + ') ' + digits[3:6] + '-' + digits[6:]\n",
    );
    write_file(root, "README.md", "# Shop\n\nA tiny shop used in tests.\n");
}

impl Harness {
    pub fn new() -> Self {
        Self::with_analysis_reply(INTELLIGENCE_JSON)
    }

    pub fn with_analysis_reply(analysis_reply: &str) -> Self {
        let tmp = TempDir::new().unwrap();
        let project = tmp.path().join("shop");
        let content_root = tmp.path().join("content");
        fs::create_dir_all(&project).unwrap();
        seed_project(&project);

        let embedder = Arc::new(FakeEmbedder::new());
        let llm = Arc::new(RoutingLlm {
            analysis_reply: analysis_reply.to_string(),
            chat_reply: "The phone number is formatted in phone.py.".to_string(),
            requests: Mutex::new(Vec::new()),
        });
        let service = KnowledgeService::with_providers(
            test_config(&content_root),
            Arc::new(HarnessProviders {
                embedder: embedder.clone(),
                llm: llm.clone(),
            }),
        )
        .unwrap();

        Self {
            tmp,
            project,
            content_root,
            embedder,
            llm,
            service,
        }
    }

    pub fn credentials() -> Credentials {
        Credentials::new(Some("sk-test".into()), Some("sk-ant-test".into()))
    }

    pub fn project_dir(&self) -> PathBuf {
        self.content_root.join("shop")
    }
}
