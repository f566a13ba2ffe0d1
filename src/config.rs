use serde::{Deserialize, Deserializer};
use std::env;
use std::path::{Path, PathBuf};

/// OpenWrt 下的 UCI 配置文件
pub const DEFAULT_UCI_PATH: &str = "/etc/config/fileshare";

const QUOTES: &[char] = &['\'', '"'];

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub access: AccessConfig,
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// 部署在反向代理之后时，从 X-Forwarded-For / X-Real-IP 取客户端地址
    /// （仅当 TCP 对端是内网或本机地址时生效）
    pub trust_proxy: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            trust_proxy: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AccessConfig {
    pub password: String,
    #[serde(deserialize_with = "deserialize_host_list")]
    pub allowed_hosts: Vec<String>,
}

impl Default for AccessConfig {
    fn default() -> Self {
        Self {
            password: "123456".to_string(),
            allowed_hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub upload_dir: PathBuf,
    pub shared_text_file: PathBuf,
    pub public_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: PathBuf::from("uploads"),
            shared_text_file: PathBuf::from("shared-text.txt"),
            public_dir: PathBuf::from("public"),
        }
    }
}

/// `allowed_hosts` 既可以写成数组，也可以写成逗号分隔的字符串
fn deserialize_host_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum HostList {
        List(Vec<String>),
        Csv(String),
    }

    let hosts = match HostList::deserialize(deserializer)? {
        HostList::List(list) => list
            .iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect(),
        HostList::Csv(csv) => split_hosts(&csv),
    };
    Ok(hosts)
}

/// 逗号分隔 -> 去空白 -> 去掉空项
pub fn split_hosts(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .collect()
}

/// 解析一行 UCI 配置：`option key 'value'` 或 `option key "value"`
fn parse_uci_option(line: &str) -> Option<(&str, &str)> {
    let rest = line.trim_start().strip_prefix("option")?;
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }
    let rest = rest.trim_start();

    let key_len = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    if key_len == 0 {
        return None;
    }
    let (key, rest) = rest.split_at(key_len);
    if !rest.starts_with(char::is_whitespace) {
        return None;
    }

    let rest = rest.trim_start().strip_prefix(QUOTES)?;
    let value_len = rest.find(QUOTES)?;
    if value_len == 0 {
        return None;
    }
    Some((key, &rest[..value_len]))
}

impl Config {
    /// 加载配置，任何一层失败都只记录警告并沿用已有的值
    ///
    /// 优先级（低 -> 高）：内置默认值、config.toml、UCI 文件、.env 与环境变量。
    pub fn load() -> Self {
        // 加载 .env 文件 (如果存在)
        let _ = dotenvy::dotenv();

        let mut config = match Self::from_file("config") {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("读取 config.toml 失败: {}，使用默认配置", e);
                Config::default()
            }
        };

        let uci_path = env::var("FILESHARE_UCI_PATH").unwrap_or_else(|_| DEFAULT_UCI_PATH.to_string());
        config.apply_uci_file(Path::new(&uci_path));
        config.apply_env(|key| env::var(key).ok());

        tracing::info!(
            "配置加载: 端口={}, 密码={}, 允许主机={}",
            config.server.port,
            if config.access.password.is_empty() { "未设置" } else { "已设置" },
            if config.access.allowed_hosts.is_empty() {
                "无".to_string()
            } else {
                config.access.allowed_hosts.join(",")
            }
        );

        config
    }

    /// 从配置文件加载（文件不存在时返回默认配置）
    pub fn from_file(name: &str) -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .add_source(config::File::with_name(name).required(false))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }

    /// 叠加 UCI 配置文件
    pub fn apply_uci_file(&mut self, path: &Path) {
        if !path.exists() {
            tracing::debug!("UCI 配置文件不存在: {:?}", path);
            return;
        }

        match std::fs::read_to_string(path) {
            Ok(content) => {
                self.apply_uci(&content);
                tracing::info!("已读取 UCI 配置文件: {:?}", path);
            }
            Err(e) => tracing::warn!("读取 UCI 配置文件失败 {:?}: {}，忽略", path, e),
        }
    }

    pub fn apply_uci(&mut self, content: &str) {
        for (key, value) in content.lines().filter_map(parse_uci_option) {
            match key {
                "port" => self.set_port(value),
                "password" => self.access.password = value.to_string(),
                "allowed_hosts" => self.access.allowed_hosts = split_hosts(value),
                _ => {}
            }
        }
    }

    /// 叠加环境变量（小写名优先，其次大写）
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .or_else(|| lookup(&name.to_ascii_uppercase()))
                .filter(|v| !v.is_empty())
        };

        if let Some(port) = get("port") {
            self.set_port(&port);
        }
        if let Some(password) = get("password") {
            self.access.password = password;
        }
        if let Some(hosts) = get("allowed_hosts") {
            self.access.allowed_hosts = split_hosts(&hosts);
        }
    }

    fn set_port(&mut self, value: &str) {
        match value.trim().parse::<u16>() {
            Ok(port) if port >= 1 => self.server.port = port,
            _ => tracing::warn!("无效的端口值: {}，保留 {}", value, self.server.port),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.server.host, "0.0.0.0");
        assert!(config.server.trust_proxy);
        assert_eq!(config.access.password, "123456");
        assert!(config.access.allowed_hosts.is_empty());
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
    }

    #[test]
    fn test_parse_uci_option() {
        assert_eq!(parse_uci_option("  option port '8080'"), Some(("port", "8080")));
        assert_eq!(
            parse_uci_option("\toption allowed_hosts \"nas.lan, 192.168.1.2\""),
            Some(("allowed_hosts", "nas.lan, 192.168.1.2"))
        );
        assert_eq!(parse_uci_option("option password ''"), None);
        assert_eq!(parse_uci_option("optionport '1'"), None);
        assert_eq!(parse_uci_option("config fileshare 'main'"), None);
        assert_eq!(parse_uci_option("option password secret"), None);
    }

    #[test]
    fn test_apply_uci() {
        let mut config = Config::default();
        config.apply_uci(
            "config fileshare 'main'\n\
             \toption port '8088'\n\
             \toption password 'hunter2'\n\
             \toption allowed_hosts 'nas.lan, ,192.168.1.'\n\
             \toption unknown 'x'\n",
        );
        assert_eq!(config.server.port, 8088);
        assert_eq!(config.access.password, "hunter2");
        assert_eq!(config.access.allowed_hosts, vec!["nas.lan", "192.168.1."]);
    }

    #[test]
    fn test_invalid_port_is_ignored() {
        let mut config = Config::default();
        config.apply_uci("option port '70000'\noption port '0'\noption port 'abc'");
        assert_eq!(config.server.port, 3000);
    }

    #[test]
    fn test_apply_env() {
        let vars: HashMap<&str, &str> = [
            ("PASSWORD", "upper"),
            ("password", "lower"),
            ("ALLOWED_HOSTS", "a.lan,b.lan"),
            ("PORT", "9000"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.access.password, "lower");
        assert_eq!(config.access.allowed_hosts, vec!["a.lan", "b.lan"]);
        assert_eq!(config.server.port, 9000);
    }

    #[test]
    fn test_from_toml_file() {
        let dir = std::env::temp_dir().join(format!("fileshare_config_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "[server]\nport = 4000\ntrust_proxy = false\n\n[access]\npassword = \"pw\"\nallowed_hosts = \"x.lan, y.lan\"\n",
        )
        .unwrap();

        let name = dir.join("config");
        let config = Config::from_file(name.to_str().unwrap()).unwrap();
        assert_eq!(config.server.port, 4000);
        assert!(!config.server.trust_proxy);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.access.password, "pw");
        assert_eq!(config.access.allowed_hosts, vec!["x.lan", "y.lan"]);
        assert_eq!(config.storage.public_dir, PathBuf::from("public"));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let config = Config::from_file("/nonexistent/fileshare/config").unwrap();
        assert_eq!(config.server.port, 3000);
    }
}
