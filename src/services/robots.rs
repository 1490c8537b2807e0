//! robots.txt parsing and a per-origin cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use regex::Regex;
use tokio::sync::OnceCell;
use url::Url;

use crate::utils::http::HttpClient;

#[derive(Debug, Clone)]
struct Rule {
    allow: bool,
    pattern: String,
    regex: Regex,
}

impl Rule {
    fn new(allow: bool, pattern: &str) -> Option<Self> {
        let mut source = regex::escape(pattern).replace("\\*", ".*");
        if source.ends_with("\\$") {
            source.truncate(source.len() - 2);
            source.push('$');
        }
        let regex = Regex::new(&format!("^{source}")).ok()?;
        Some(Self {
            allow,
            pattern: pattern.to_string(),
            regex,
        })
    }
}

#[derive(Debug, Clone, Default)]
struct Group {
    agents: Vec<String>,
    rules: Vec<Rule>,
}

/// Parsed robots.txt.
///
/// Groups are selected by product-token match on the user agent, falling back
/// to `*`. Within a group the longest matching pattern wins and `Allow` wins
/// ties.
#[derive(Debug, Clone, Default)]
pub struct RobotsTxt {
    groups: Vec<Group>,
}

impl RobotsTxt {
    /// A policy that allows everything.
    pub fn allow_all() -> Self {
        Self::default()
    }

    pub fn parse(content: &str) -> Self {
        let mut groups: Vec<Group> = Vec::new();
        let mut current = Group::default();
        let mut in_agent_block = false;

        for line in content.lines() {
            let line = line.split('#').next().unwrap_or("").trim();
            let Some((key, value)) = line.split_once(':') else {
                continue;
            };
            let key = key.trim().to_ascii_lowercase();
            let value = value.trim();

            match key.as_str() {
                "user-agent" => {
                    if !in_agent_block && !current.agents.is_empty() {
                        groups.push(std::mem::take(&mut current));
                    }
                    current.agents.push(value.to_ascii_lowercase());
                    in_agent_block = true;
                }
                "allow" | "disallow" => {
                    in_agent_block = false;
                    if current.agents.is_empty() || value.is_empty() {
                        continue;
                    }
                    if let Some(rule) = Rule::new(key == "allow", value) {
                        current.rules.push(rule);
                    }
                }
                _ => {}
            }
        }
        if !current.agents.is_empty() {
            groups.push(current);
        }

        Self { groups }
    }

    fn group_for(&self, user_agent: &str) -> Option<&Group> {
        let ua = user_agent.to_ascii_lowercase();
        let token = ua.split(['/', ' ']).next().unwrap_or("");
        self.groups
            .iter()
            .find(|g| {
                g.agents
                    .iter()
                    .any(|a| a != "*" && !token.is_empty() && (a == token || ua.contains(a.as_str())))
            })
            .or_else(|| self.groups.iter().find(|g| g.agents.iter().any(|a| a == "*")))
    }

    pub fn is_path_allowed(&self, path: &str, user_agent: &str) -> bool {
        let Some(group) = self.group_for(user_agent) else {
            return true;
        };

        group
            .rules
            .iter()
            .filter(|r| r.regex.is_match(path))
            .max_by_key(|r| (r.pattern.len(), r.allow))
            .is_none_or(|r| r.allow)
    }

    pub fn is_allowed(&self, url: &str, user_agent: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => {
                let path = match parsed.query() {
                    Some(q) => format!("{}?{}", parsed.path(), q),
                    None => parsed.path().to_string(),
                };
                self.is_path_allowed(&path, user_agent)
            }
            Err(_) => true,
        }
    }
}

/// Lazily fetched robots.txt per origin, shared across crawl tasks.
#[derive(Default)]
pub struct RobotsCache {
    entries: Mutex<HashMap<String, Arc<OnceCell<RobotsTxt>>>>,
}

impl RobotsCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether `url` may be fetched by `user_agent`.
    ///
    /// A missing or unreadable robots.txt allows everything.
    pub async fn is_allowed(&self, client: &dyn HttpClient, url: &str, user_agent: &str) -> bool {
        let Ok(parsed) = Url::parse(url) else {
            return true;
        };
        let origin = parsed.origin().ascii_serialization();

        let cell = match self.entries.lock() {
            Ok(mut entries) => Arc::clone(entries.entry(origin.clone()).or_default()),
            Err(_) => return true,
        };

        let robots = cell
            .get_or_init(|| async {
                let robots_url = format!("{origin}/robots.txt");
                match client.get(&robots_url).await {
                    Ok(response) if response.is_success() => match response.text().await {
                        Ok(body) => RobotsTxt::parse(&body),
                        Err(e) => {
                            log::debug!("robots.txt body unreadable at {}: {}", robots_url, e);
                            RobotsTxt::allow_all()
                        }
                    },
                    Ok(response) => {
                        log::debug!("robots.txt {} at {}", response.status, robots_url);
                        RobotsTxt::allow_all()
                    }
                    Err(e) => {
                        log::debug!("robots.txt fetch failed at {}: {}", robots_url, e);
                        RobotsTxt::allow_all()
                    }
                }
            })
            .await;

        robots.is_allowed(url, user_agent)
    }
}
