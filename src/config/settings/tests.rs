use super::*;
use tempfile::TempDir;

#[test]
fn default_config() {
    let config = Config::default();
    assert_eq!(config.ollama.protocol, "http");
    assert_eq!(config.ollama.host, "localhost");
    assert_eq!(config.ollama.port, 11434);
    assert_eq!(config.ollama.embedding_model, "mxbai-embed-large");
    assert_eq!(config.ollama.chat_model, "llama3.1");
    assert_eq!(config.ollama.timeout_seconds, 30);
    assert_eq!(config.chunking.chunk_size, 4000);
    assert_eq!(config.chunking.chunk_overlap, 200);
    assert!(config.validate().is_ok());
}

#[test]
fn config_validation() {
    let config = Config::default();

    let mut invalid_config = config.clone();
    invalid_config.ollama.protocol = "ftp".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.port = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.chat_model = String::new();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.batch_size = 1001;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.ollama.timeout_seconds = 0;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.loader.user_agent = " ".to_string();
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config.clone();
    invalid_config.chunking.chunk_size = 50;
    assert!(invalid_config.validate().is_err());

    let mut invalid_config = config;
    invalid_config.chunking.chunk_overlap = invalid_config.chunking.chunk_size;
    assert!(matches!(
        invalid_config.validate(),
        Err(ConfigError::InvalidChunkOverlap(_, _))
    ));
}

#[test]
fn ollama_url_generation() {
    let config = Config::default();
    let url = config
        .ollama_url()
        .expect("should generate ollama_url successfully");
    assert_eq!(url.as_str(), "http://localhost:11434/");
}

#[test]
fn toml_serialization() {
    let config = Config::default();
    let toml_str = toml::to_string(&config).expect("should serialize toml correctly");
    let parsed_config: Config = toml::from_str(&toml_str).expect("should parse toml correctly");
    assert_eq!(config, parsed_config);
}

#[test]
fn partial_toml_uses_defaults() {
    let parsed: Config = toml::from_str(
        r#"
        [ollama]
        chat_model = "mistral"
        "#,
    )
    .expect("partial config should parse");

    assert_eq!(parsed.ollama.chat_model, "mistral");
    assert_eq!(parsed.ollama.port, 11434);
    assert_eq!(parsed.chunking, ChunkingConfig::default());
    assert!(parsed.databases_dir.is_none());
}

#[test]
fn setter_validation() {
    let mut config = OllamaConfig::default();

    assert!(config.set_protocol("https".to_string()).is_ok());
    assert!(config.set_host("example.com".to_string()).is_ok());
    assert!(config.set_port(8080).is_ok());
    assert!(config.set_embedding_model("all-minilm".to_string()).is_ok());
    assert!(config.set_chat_model("mistral".to_string()).is_ok());
    assert!(config.set_batch_size(128).is_ok());
    assert!(config.set_timeout_seconds(120).is_ok());

    assert!(config.set_protocol("ftp".to_string()).is_err());
    assert!(config.set_port(0).is_err());
    assert!(config.set_embedding_model(String::new()).is_err());
    assert!(config.set_batch_size(0).is_err());
    assert!(config.set_timeout_seconds(601).is_err());

    assert_eq!(config.protocol, "https");
    assert_eq!(config.port, 8080);
    assert_eq!(config.timeout_seconds, 120);
}

#[test]
fn load_missing_file_uses_defaults() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let config = Config::load(temp_dir.path()).expect("should load defaults");

    assert_eq!(config.ollama, OllamaConfig::default());
    assert_eq!(config.get_base_dir(), temp_dir.path());
    assert_eq!(config.databases_dir(), temp_dir.path().join("databases"));
}

#[test]
fn save_and_load_round_trip() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    let mut config = Config {
        base_dir: temp_dir.path().join("nested"),
        databases_dir: Some(temp_dir.path().join("dbs")),
        ..Config::default()
    };
    config
        .ollama
        .set_chat_model("mistral".to_string())
        .expect("valid model");

    config.save().expect("should save config");
    assert!(config.config_file_path().exists());

    let loaded = Config::load(temp_dir.path().join("nested")).expect("should load config");
    assert_eq!(loaded, config);
    assert_eq!(loaded.databases_dir(), temp_dir.path().join("dbs"));
}

#[test]
fn load_rejects_invalid_values() {
    let temp_dir = TempDir::new().expect("should create temp dir");
    fs::write(
        temp_dir.path().join("config.toml"),
        "[ollama]\nprotocol = \"gopher\"\n",
    )
    .expect("should write config");

    assert!(Config::load(temp_dir.path()).is_err());
}
