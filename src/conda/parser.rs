//! 输出解析函数：conda info、conda-meta 记录、pip 元数据、dry-run JSON

use super::types::{CondaError, PackageRecord};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;

/// 清理一行终端输出中的 ANSI 转义序列和控制字符。
/// `\r` 就地刷新的进度行只保留最后一段。
pub fn clean_terminal_line(input: &str) -> String {
    let visible = input.rsplit('\r').find(|s| !s.is_empty()).unwrap_or("");
    let mut result = String::with_capacity(visible.len());
    let mut chars = visible.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\x1b' => {
                if chars.peek() == Some(&'[') {
                    chars.next();
                    while let Some(&next) = chars.peek() {
                        chars.next();
                        if next.is_ascii_alphabetic() {
                            break;
                        }
                    }
                }
            }
            c if c.is_control() && c != '\t' => {}
            _ => result.push(c),
        }
    }
    result
}

// ========== conda info --json ==========

/// `conda info --json` 中用到的字段
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CondaInfo {
    #[serde(default)]
    pub conda_version: String,
    pub root_prefix: PathBuf,
    #[serde(default)]
    pub envs_dirs: Vec<PathBuf>,
    #[serde(default)]
    pub envs: Vec<PathBuf>,
}

pub fn parse_conda_info(raw: &str) -> Result<CondaInfo, CondaError> {
    Ok(serde_json::from_str(json_body(raw))?)
}

// ========== conda-meta/*.json ==========

#[derive(Debug, Deserialize)]
struct RawPrefixRecord {
    name: String,
    version: String,
    #[serde(default)]
    build: String,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    schannel: Option<String>,
    #[serde(default)]
    subdir: Option<String>,
    #[serde(default)]
    extracted_package_dir: Option<PathBuf>,
}

/// 解析 `<prefix>/conda-meta/<dist>.json`
pub fn parse_prefix_record(raw: &str) -> Result<PackageRecord, CondaError> {
    let fields: Value = serde_json::from_str(raw)?;
    let record: RawPrefixRecord = serde_json::from_value(fields.clone())?;

    let schannel = match (record.schannel, record.channel) {
        (Some(s), _) if !s.is_empty() => s,
        (_, Some(channel)) => short_channel_name(&channel, record.subdir.as_deref()),
        _ => String::new(),
    };

    Ok(PackageRecord {
        name: record.name,
        version: record.version,
        build: record.build,
        schannel,
        extracted_package_dir: record
            .extracted_package_dir
            .filter(|p| !p.as_os_str().is_empty()),
        fields,
    })
}

const PLATFORM_PREFIXES: &[&str] = &["linux-", "osx-", "win-", "emscripten-", "wasi-", "zos-"];

fn is_subdir(segment: &str, subdir: Option<&str>) -> bool {
    Some(segment) == subdir
        || segment == "noarch"
        || PLATFORM_PREFIXES.iter().any(|p| segment.starts_with(p))
}

/// 渠道 URL → 短渠道名
///
/// `https://conda.anaconda.org/conda-forge/linux-64` → `conda-forge`，
/// `https://repo.anaconda.com/pkgs/main/osx-arm64` → `pkgs/main`。
/// 其他主机保留完整地址，只去掉平台子目录。
pub fn short_channel_name(channel: &str, subdir: Option<&str>) -> String {
    let Some((scheme, rest)) = channel.split_once("://") else {
        return channel.trim_end_matches('/').to_string();
    };

    let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
    if segments.is_empty() {
        return channel.to_string();
    }
    let host = segments.remove(0);

    if segments.last().is_some_and(|last| is_subdir(last, subdir)) {
        segments.pop();
    }
    // 带 token 的地址：/t/<token>/channel
    if segments.first() == Some(&"t") && segments.len() > 2 {
        segments.drain(..2);
    }

    match host {
        "conda.anaconda.org" | "repo.anaconda.com" if !segments.is_empty() => segments.join("/"),
        _ if segments.is_empty() => format!("{scheme}://{host}"),
        _ => format!("{scheme}://{host}/{}", segments.join("/")),
    }
}

// ========== pip dist-info ==========

/// 从 dist-info 的 METADATA 头部读取 (Name, Version)
pub fn parse_dist_info_metadata(raw: &str) -> Option<(String, String)> {
    let mut name = None;
    let mut version = None;
    for line in raw.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some((key, val)) = line.split_once(':') {
            match key.trim() {
                "Name" => name = Some(val.trim().to_string()),
                "Version" => version = Some(val.trim().to_string()),
                _ => {}
            }
        }
    }
    Some((name?, version?))
}

// ========== conda update --dry-run --json ==========

/// dry-run 输出无法得出更新列表的原因
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DryRunError {
    #[error("输出无法解析: {0}")]
    Malformed(String),
    #[error("conda 报告错误: {0}")]
    Reported(String),
}

/// 解析 dry-run 输出，返回 包名 → 新版本。
///
/// 没有 `actions` 或 `FETCH` 视为没有可用更新。
pub fn parse_fetch_actions(raw: &str) -> Result<BTreeMap<String, String>, DryRunError> {
    let value: Value = serde_json::from_str(json_body(raw))
        .map_err(|e| DryRunError::Malformed(e.to_string()))?;

    let Some(obj) = value.as_object() else {
        return Err(DryRunError::Malformed("顶层不是对象".to_string()));
    };

    if obj.contains_key("error") || obj.contains_key("exception_name") {
        let message = obj
            .get("message")
            .or_else(|| obj.get("error"))
            .and_then(Value::as_str)
            .unwrap_or("未知错误");
        return Err(DryRunError::Reported(message.trim().to_string()));
    }

    let mut updates = BTreeMap::new();
    let action_sets: Vec<&Value> = match obj.get("actions") {
        None | Some(Value::Null) => return Ok(updates),
        Some(Value::Array(items)) => items.iter().collect(),
        Some(other) => vec![other],
    };

    for actions in action_sets {
        let fetch = match actions.get("FETCH") {
            None | Some(Value::Null) => continue,
            Some(Value::Array(items)) => items,
            Some(_) => return Err(DryRunError::Malformed("FETCH 不是数组".to_string())),
        };
        for entry in fetch {
            let name = entry.get("name").and_then(Value::as_str);
            let version = entry.get("version").and_then(Value::as_str);
            if let (Some(name), Some(version)) = (name, version) {
                updates.insert(name.to_string(), version.to_string());
            }
        }
    }

    Ok(updates)
}

/// conda 偶尔会在 JSON 前输出提示文字，从第一个 `{` 开始截取
fn json_body(raw: &str) -> &str {
    let trimmed = raw.trim_start();
    if trimmed.starts_with('{') {
        return trimmed;
    }
    match raw.find("\n{") {
        Some(pos) => &raw[pos + 1..],
        None => trimmed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cleans_ansi_and_carriage_returns() {
        assert_eq!(clean_terminal_line("\x1b[1;32mdone\x1b[0m"), "done");
        assert_eq!(clean_terminal_line("10%\r50%\r100%"), "100%");
        assert_eq!(clean_terminal_line("a\tb\x07"), "a\tb");
    }

    #[test]
    fn parses_conda_info() {
        let raw = r#"{
            "conda_version": "24.9.2",
            "root_prefix": "/opt/conda",
            "envs_dirs": ["/opt/conda/envs", "/home/u/.conda/envs"],
            "envs": ["/opt/conda", "/opt/conda/envs/py311"],
            "platform": "linux-64"
        }"#;
        let info = parse_conda_info(raw).unwrap();
        assert_eq!(info.conda_version, "24.9.2");
        assert_eq!(info.root_prefix, PathBuf::from("/opt/conda"));
        assert_eq!(info.envs_dirs.len(), 2);
        assert_eq!(info.envs[1], PathBuf::from("/opt/conda/envs/py311"));
    }

    #[test]
    fn parses_prefix_record() {
        let raw = r#"{
            "name": "numpy",
            "version": "1.26.4",
            "build": "py311h64a7726_0",
            "build_number": 0,
            "channel": "https://conda.anaconda.org/conda-forge/linux-64",
            "subdir": "linux-64",
            "extracted_package_dir": "/opt/conda/pkgs/numpy-1.26.4-py311h64a7726_0"
        }"#;
        let rec = parse_prefix_record(raw).unwrap();
        assert_eq!(rec.name, "numpy");
        assert_eq!(rec.version, "1.26.4");
        assert_eq!(rec.schannel, "conda-forge");
        assert_eq!(
            rec.extracted_package_dir,
            Some(PathBuf::from("/opt/conda/pkgs/numpy-1.26.4-py311h64a7726_0"))
        );
        assert!(rec.dist_fields_dump().contains("build_number"));
    }

    #[test]
    fn empty_extracted_dir_is_none() {
        let raw = r#"{"name": "x", "version": "1", "extracted_package_dir": ""}"#;
        assert_eq!(parse_prefix_record(raw).unwrap().extracted_package_dir, None);
    }

    #[test]
    fn short_channel_names() {
        assert_eq!(
            short_channel_name("https://repo.anaconda.com/pkgs/main/osx-arm64", None),
            "pkgs/main"
        );
        assert_eq!(
            short_channel_name("https://conda.anaconda.org/bioconda/noarch", Some("noarch")),
            "bioconda"
        );
        assert_eq!(
            short_channel_name("https://conda.anaconda.org/t/abc-123/private/linux-64", None),
            "private"
        );
        assert_eq!(short_channel_name("conda-forge", None), "conda-forge");
        assert_eq!(
            short_channel_name("https://mirror.local/conda/stable/linux-64", Some("linux-64")),
            "https://mirror.local/conda/stable"
        );
    }

    #[test]
    fn reads_dist_info_metadata() {
        let raw = "Metadata-Version: 2.1\nName: requests\nVersion: 2.32.3\n\nName: ignored\n";
        assert_eq!(
            parse_dist_info_metadata(raw),
            Some(("requests".to_string(), "2.32.3".to_string()))
        );
        assert_eq!(parse_dist_info_metadata("Name: only-name\n"), None);
    }

    #[test]
    fn fetch_actions_from_dry_run() {
        let raw = r#"{
            "actions": {
                "FETCH": [
                    {"name": "openssl", "version": "3.3.2", "build": "h"},
                    {"name": "python", "version": "3.12.7"},
                    "garbage"
                ],
                "LINK": []
            },
            "dry_run": true
        }"#;
        let updates = parse_fetch_actions(raw).unwrap();
        assert_eq!(updates.len(), 2);
        assert_eq!(updates["openssl"], "3.3.2");
    }

    #[test]
    fn no_actions_means_no_updates() {
        let raw = r#"{"message": "All requested packages already installed.", "success": true}"#;
        assert!(parse_fetch_actions(raw).unwrap().is_empty());
    }

    #[test]
    fn leading_noise_is_skipped() {
        let raw = "Collecting package metadata: done\n{\"actions\": {\"FETCH\": [{\"name\": \"a\", \"version\": \"2\"}]}}";
        assert_eq!(parse_fetch_actions(raw).unwrap()["a"], "2");
    }

    #[test]
    fn malformed_and_reported_errors_are_distinct() {
        assert!(matches!(
            parse_fetch_actions("not json at all"),
            Err(DryRunError::Malformed(_))
        ));
        assert!(matches!(
            parse_fetch_actions(r#"{"actions": {"FETCH": "nope"}}"#),
            Err(DryRunError::Malformed(_))
        ));
        let err = parse_fetch_actions(
            r#"{"exception_name": "EnvironmentLocationNotFound", "message": "Not a conda environment: /x"}"#,
        )
        .unwrap_err();
        assert_eq!(err, DryRunError::Reported("Not a conda environment: /x".to_string()));
    }
}
