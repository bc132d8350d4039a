//! Command matching module
//!
//! Voice vocabulary lives in an ordered table of bindings. Each binding maps a
//! command tag to regex patterns searched anywhere in the normalized text, plus
//! the phrases spoken when the command starts and completes. Bare navigation
//! intent ("导航", "我要去") is tested before anything else so destinations
//! spoken in a follow-up utterance can be collected.

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub const NAVIGATION_TRIGGER: &str = "navigation_trigger";
pub const NAVIGATION_COMPLETE: &str = "navigation_complete";

const DEFAULT_STARTED: &str = "正在为您执行指令";
const DEFAULT_COMPLETED: &str = "指令已完成";

fn default_announce() -> bool {
    true
}

/// A voice command binding
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandBinding {
    /// Tag handed to the command callback
    pub tag: String,
    /// Regex patterns searched in the normalized text
    pub patterns: Vec<String>,
    /// Spoken when the command is dispatched
    #[serde(default)]
    pub started: Option<String>,
    /// Spoken after the command callback succeeds
    #[serde(default)]
    pub completed: Option<String>,
    /// Silent commands skip both phrases
    #[serde(default = "default_announce")]
    pub announce: bool,
}

impl CommandBinding {
    pub fn new(tag: &str, patterns: &[&str], started: &str, completed: &str) -> Self {
        Self {
            tag: tag.to_string(),
            patterns: patterns.iter().map(|p| p.to_string()).collect(),
            started: Some(started.to_string()),
            completed: Some(completed.to_string()),
            announce: true,
        }
    }

    pub fn silent(mut self) -> Self {
        self.announce = false;
        self
    }
}

/// Built-in in-car vocabulary, in match priority order
pub fn default_bindings() -> Vec<CommandBinding> {
    vec![
        CommandBinding::new(
            NAVIGATION_TRIGGER,
            &[
                "导航到?", "导航", "出发去?", "我要去", "前往", "开始导航", "去", "到", "路线到?",
                "开车去", "带我去", "指路到?", "怎么去",
            ],
            "正在为您启动导航",
            "导航已启动",
        ),
        CommandBinding::new(
            NAVIGATION_COMPLETE,
            &[
                "导航到(.+)", "出发去(.+)", "我要去(.+)", "前往(.+)", "开始导航到(.+)", "导航(.+)",
                "路线到(.+)", "开车去(.+)", "带我去(.+)", "指路到(.+)", "怎么去(.+)",
            ],
            "正在为您规划路线",
            "路线规划完成",
        ),
        CommandBinding::new(
            "navigation_stop",
            &["停止导航", "结束导航", "取消导航", "关闭导航"],
            "正在为您停止导航",
            "导航已停止",
        ),
        CommandBinding::new(
            "navigation_home",
            &[
                "回家", "导航回家", "我要回家", "开车回家", "回到家", "导航到家", "带我回家", "开始回家",
                "出发回家", "回家去",
            ],
            "正在为您导航回家",
            "回家路线规划完成",
        ),
        CommandBinding::new(
            "set_home_location",
            &[
                "这里是我家", "设置为我家", "这是我家", "记住这里是我家", "保存为我家", "这就是我家",
                "设为家", "记为我家", "保存这个位置为我家", "将这里设为我家",
            ],
            "正在为您设置家位置",
            "家位置设置完成",
        ),
        CommandBinding::new(
            "music_play",
            &["播放音乐", "开始播放", "开始音乐", "打开音乐"],
            "正在为您播放音乐",
            "音乐播放已开始",
        ),
        CommandBinding::new(
            "music_pause",
            &["暂停音乐", "暂停播放", "暂停", "停止音乐", "停止播放"],
            "正在为您暂停音乐",
            "音乐已暂停",
        ),
        CommandBinding::new(
            "music_next",
            &["下一首", "下首歌", "换歌", "下一个", "下一曲"],
            "正在为您切换下一首",
            "已切换到下一首",
        ),
        CommandBinding::new(
            "music_prev",
            &["上一首", "上首歌", "前一首", "上一个", "上一曲"],
            "正在为您切换上一首",
            "已切换到上一首",
        ),
        CommandBinding::new(
            "ac_on",
            &["开空调", "打开空调", "开启空调"],
            "正在为您开启空调",
            "空调已开启",
        ),
        CommandBinding::new(
            "ac_off",
            &["关空调", "关闭空调", "停止空调"],
            "正在为您关闭空调",
            "空调已关闭",
        ),
        CommandBinding::new(
            "temp_up",
            &[
                "升温", "调高温度", "温度调高", "加热", "提高温度", "增加温度", "调高一点", "热一点",
            ],
            "正在为您调高温度",
            "温度已调高",
        ),
        CommandBinding::new(
            "temp_down",
            &[
                "降温", "调低温度", "温度调低", "制冷", "降低温度", "减少温度", "调低一点", "凉一点",
            ],
            "正在为您调低温度",
            "温度已调低",
        ),
        CommandBinding::new(
            "window_open",
            &["开窗", "开车窗", "打开车窗", "打开窗户"],
            "正在为您开启车窗",
            "车窗已开启",
        ),
        CommandBinding::new(
            "window_close",
            &["关窗", "关车窗", "关闭车窗", "关闭窗户"],
            "正在为您关闭车窗",
            "车窗已关闭",
        ),
        CommandBinding::new(
            "light_on",
            &["开灯", "打开大灯", "开大灯", "开启头灯"],
            "正在为您开启大灯",
            "大灯已开启",
        )
        .silent(),
        CommandBinding::new(
            "light_off",
            &["关灯", "关闭大灯", "关大灯", "关闭头灯"],
            "正在为您关闭大灯",
            "大灯已关闭",
        )
        .silent(),
        CommandBinding::new(
            "interior_on",
            &["开室内灯", "打开车内灯", "开车内灯"],
            "正在为您开启室内灯",
            "室内灯已开启",
        ),
        CommandBinding::new(
            "interior_off",
            &["关室内灯", "关闭车内灯", "关车内灯"],
            "正在为您关闭室内灯",
            "室内灯已关闭",
        ),
    ]
}

/// Spoken feedback for one command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phrases {
    pub started: String,
    pub completed: String,
    pub announce: bool,
}

impl Default for Phrases {
    fn default() -> Self {
        Self {
            started: DEFAULT_STARTED.to_string(),
            completed: DEFAULT_COMPLETED.to_string(),
            announce: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandMatch {
    pub tag: String,
    /// The text the callback receives
    pub text: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MatchOutcome {
    /// Bare navigation intent, destination still to be collected
    Trigger(String),
    Command(CommandMatch),
    NoMatch,
}

#[derive(Debug)]
struct CommandEntry {
    tag: String,
    patterns: Vec<Regex>,
    phrases: Phrases,
}

/// Ordered, first-match-wins command table
#[derive(Debug)]
pub struct CommandTable {
    entries: Vec<CommandEntry>,
}

impl Default for CommandTable {
    fn default() -> Self {
        Self::new(default_bindings())
    }
}

impl CommandTable {
    /// Build a table; patterns that fail to compile are logged and skipped
    pub fn new(bindings: Vec<CommandBinding>) -> Self {
        let mut table = Self {
            entries: Vec::new(),
        };
        table.extend(bindings);
        info!("📋 Loaded {} command tags", table.entries.len());
        table
    }

    /// Append bindings. A tag already present gains the extra patterns.
    pub fn extend(&mut self, bindings: Vec<CommandBinding>) {
        for binding in bindings {
            let patterns = compile_patterns(&binding.tag, &binding.patterns);
            let defaults = Phrases::default();

            if let Some(entry) = self.entries.iter_mut().find(|e| e.tag == binding.tag) {
                entry.patterns.extend(patterns);
                if let Some(started) = binding.started {
                    entry.phrases.started = started;
                }
                if let Some(completed) = binding.completed {
                    entry.phrases.completed = completed;
                }
                entry.phrases.announce = binding.announce;
                continue;
            }

            self.entries.push(CommandEntry {
                tag: binding.tag,
                patterns,
                phrases: Phrases {
                    started: binding.started.unwrap_or(defaults.started),
                    completed: binding.completed.unwrap_or(defaults.completed),
                    announce: binding.announce,
                },
            });
        }
    }

    /// Resolve normalized text to a trigger, a command, or nothing
    pub fn classify(&self, text: &str) -> MatchOutcome {
        let text = text.trim();
        if text.is_empty() {
            return MatchOutcome::NoMatch;
        }

        if let Some(trigger) = self.entry(NAVIGATION_TRIGGER) {
            if let Some(pattern) = trigger.patterns.iter().find(|p| p.is_match(text)) {
                info!("🧭 Navigation intent '{}' in '{}'", pattern.as_str(), text);
                return MatchOutcome::Trigger(text.to_string());
            }
        }

        for entry in &self.entries {
            if entry.tag == NAVIGATION_TRIGGER || entry.tag == NAVIGATION_COMPLETE {
                continue;
            }
            if let Some(pattern) = entry.patterns.iter().find(|p| p.is_match(text)) {
                info!("🎯 Matched command: {} (pattern: '{}')", entry.tag, pattern.as_str());
                return MatchOutcome::Command(CommandMatch {
                    tag: entry.tag.clone(),
                    text: text.to_string(),
                });
            }
        }

        debug!("No command matched for: '{}'", text);
        MatchOutcome::NoMatch
    }

    /// Feedback for a tag, falling back to the generic phrases
    pub fn phrases(&self, tag: &str) -> Phrases {
        self.entry(tag)
            .map(|e| e.phrases.clone())
            .unwrap_or_default()
    }

    /// Capture-group patterns used to pull a destination out of collected text
    pub fn destination_patterns(&self) -> &[Regex] {
        self.entry(NAVIGATION_COMPLETE)
            .map(|e| e.patterns.as_slice())
            .unwrap_or(&[])
    }

    pub fn tags(&self) -> Vec<&str> {
        self.entries.iter().map(|e| e.tag.as_str()).collect()
    }

    fn entry(&self, tag: &str) -> Option<&CommandEntry> {
        self.entries.iter().find(|e| e.tag == tag)
    }
}

fn compile_patterns(tag: &str, patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(e) => {
                warn!("❌ Invalid pattern '{}' for {}: {}", p, tag, e);
                None
            }
        })
        .collect()
}
