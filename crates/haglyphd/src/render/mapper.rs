//! Mapping watched entity states to display frames.
//!
//! Mapping is pure: the same rule, state, and capability always produce a
//! byte-identical frame. The engine relies on this to detect no-op renders.

use std::collections::HashMap;
use std::time::Duration;

use crate::config::{CompositionPolicy, ConfigError, Pattern, RuleKind, WatchRuleConfig};
use crate::display::Capability;
use crate::state::EntityState;

use super::frame::{Animation, Frame};
use super::sprite::Sprite;

/// How a rule turns an entity state into pixels.
#[derive(Debug, Clone)]
pub enum FrameRule {
    OnOff {
        on: Sprite,
        off: Sprite,
        error: Sprite,
    },
    Level {
        min: f64,
        max: f64,
    },
}

/// A compiled watch rule: pattern, priority, and frame generation.
///
/// Built once at engine start from configuration plus the device capability;
/// immutable thereafter.
#[derive(Debug, Clone)]
pub struct WatchRule {
    pub pattern: Pattern,
    pub priority: i32,
    pub rule: FrameRule,
    pub animation: Animation,
    pub duration_hint: Option<Duration>,
}

impl WatchRule {
    /// Compile a configured rule against the device capability, loading
    /// sprite files and validating their dimensions.
    pub fn from_config(cfg: &WatchRuleConfig, cap: &Capability) -> Result<Self, ConfigError> {
        let rule = match cfg.kind {
            RuleKind::OnOff => FrameRule::OnOff {
                on: load_sprite(cfg.on_sprite.as_deref(), cap, Sprite::default_on)?,
                off: load_sprite(cfg.off_sprite.as_deref(), cap, Sprite::default_off)?,
                error: load_sprite(cfg.error_sprite.as_deref(), cap, Sprite::default_error)?,
            },
            RuleKind::Level => FrameRule::Level {
                min: cfg.min.unwrap_or(0.0),
                max: cfg.max.unwrap_or(100.0),
            },
        };

        Ok(Self {
            pattern: Pattern::parse(&cfg.entity),
            priority: cfg.priority,
            rule,
            animation: cfg.animation,
            duration_hint: cfg.duration_ms.map(Duration::from_millis),
        })
    }
}

fn load_sprite(
    path: Option<&std::path::Path>,
    cap: &Capability,
    default: fn(usize, usize) -> Sprite,
) -> Result<Sprite, ConfigError> {
    let Some(path) = path else {
        return Ok(default(cap.rows, cap.cols));
    };

    let sprite = Sprite::load(path).map_err(|e| ConfigError::Sprite {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;

    if sprite.height != cap.rows || sprite.width != cap.cols {
        return Err(ConfigError::Sprite {
            path: path.to_path_buf(),
            reason: format!(
                "dimensions {}x{} do not match device grid {}x{}",
                sprite.height, sprite.width, cap.rows, cap.cols
            ),
        });
    }

    Ok(sprite)
}

/// Map one rule against one entity state. A missing entity maps to the
/// defined default: a blank frame.
pub fn map_one(rule: &WatchRule, state: Option<&EntityState>, cap: &Capability) -> Frame {
    let mut frame = match (&rule.rule, state) {
        (_, None) => Frame::blank(cap.rows, cap.cols),
        (FrameRule::OnOff { on, off, error }, Some(s)) => {
            if s.is_unavailable() {
                Frame::from_sprite(error)
            } else if s.is_on() {
                Frame::from_sprite(on)
            } else {
                Frame::from_sprite(off)
            }
        }
        (FrameRule::Level { min, max }, Some(s)) => match s.numeric() {
            // Non-numeric or unavailable state for a level rule: nothing to show
            Some(value) if !s.is_unavailable() => level_bar(value, *min, *max, cap),
            _ => Frame::blank(cap.rows, cap.cols),
        },
    };

    frame.animation = rule.animation;
    frame.duration_hint = rule.duration_hint;
    frame
}

/// Compose contributions from all rules into a single frame.
///
/// Contributions are evaluated highest priority first (ties keep rule order);
/// under `Priority` the first non-blank contribution wins, under `Overlay`
/// all contributions merge per-cell with the first non-static animation kept.
pub fn map_all(
    rules: &[WatchRule],
    snapshot: &HashMap<String, EntityState>,
    cap: &Capability,
    policy: CompositionPolicy,
) -> Frame {
    let mut order: Vec<&WatchRule> = rules.iter().collect();
    order.sort_by_key(|r| std::cmp::Reverse(r.priority));

    let mut composed = Frame::blank(cap.rows, cap.cols);

    for rule in order {
        // Entities matched by this rule, in stable id order for determinism
        let mut ids: Vec<&String> = snapshot
            .keys()
            .filter(|id| rule.pattern.matches(id))
            .collect();
        ids.sort();

        let contributions: Vec<Frame> = if ids.is_empty() {
            vec![map_one(rule, None, cap)]
        } else {
            ids.iter()
                .map(|id| map_one(rule, snapshot.get(id.as_str()), cap))
                .collect()
        };

        for frame in contributions {
            match policy {
                CompositionPolicy::Priority => {
                    if !frame.is_blank() {
                        return frame;
                    }
                }
                CompositionPolicy::Overlay => {
                    let animation = if composed.animation == Animation::Static {
                        frame.animation
                    } else {
                        composed.animation
                    };
                    let duration_hint = composed.duration_hint.or(frame.duration_hint);
                    composed = composed.max_with(&frame);
                    composed.animation = animation;
                    composed.duration_hint = duration_hint;
                }
            }
        }
    }

    composed
}

/// Render a numeric value as a bottom-up bar across the full grid width.
fn level_bar(value: f64, min: f64, max: f64, cap: &Capability) -> Frame {
    let t = ((value - min) / (max - min)).clamp(0.0, 1.0);
    let lit_rows = (t * cap.rows as f64).round() as usize;

    let mut pixels = vec![0u8; cap.rows * cap.cols];
    for row in (cap.rows - lit_rows)..cap.rows {
        for col in 0..cap.cols {
            pixels[row * cap.cols + col] = 255;
        }
    }
    Frame::from_pixels(cap.rows, cap.cols, pixels)
}
