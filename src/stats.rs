// 该文件是 Guanque （鹳雀楼） 项目的一部分。
// src/stats.rs - 帧统计
//
// 本文件根据 Apache 许可证第 2.0 版（以下简称“许可证”）授权使用；
// 除非遵守该许可证条款，否则您不得使用本文件。
// 您可通过以下网址获取许可证副本：
// http://www.apache.org/licenses/LICENSE-2.0
// 除非适用法律要求或书面同意，根据本许可协议分发的软件均按“原样”提供，
// 不附带任何形式的明示或暗示的保证或条件。
// 有关许可权限与限制的具体条款，请参阅本许可协议。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, Wareless Group

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::labels::label_str;
use crate::model::{DETR_PERSON_CLASS, DetectedObject};

/// 单帧检测对象汇总
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameSummary {
  pub frame: u64,
  pub objects: usize,
  pub persons: usize,
}

impl FrameSummary {
  /// 按解析器输出统计一帧的对象数与行人数
  pub fn tally(frame: u64, objects: &[DetectedObject]) -> Self {
    let persons = objects
      .iter()
      .filter(|obj| obj.class_id == DETR_PERSON_CLASS)
      .count();
    Self {
      frame,
      objects: objects.len(),
      persons,
    }
  }

  /// 渲染为单行 JSON，便于下游日志采集
  pub fn to_json(&self) -> serde_json::Value {
    serde_json::json!({
      "frame": self.frame,
      "objects": self.objects,
      "persons": self.persons,
      "person_label": label_str(DETR_PERSON_CLASS),
    })
  }
}

/// OSD 探针驱动的帧计数器，跨线程共享
#[derive(Debug)]
pub struct FrameCounter {
  started: Instant,
  frames: AtomicU64,
}

impl FrameCounter {
  pub fn new() -> Self {
    Self {
      started: Instant::now(),
      frames: AtomicU64::new(0),
    }
  }

  /// 记录一帧，返回累计帧号（从 1 开始）
  pub fn record(&self) -> u64 {
    self.frames.fetch_add(1, Ordering::Relaxed) + 1
  }

  pub fn frames(&self) -> u64 {
    self.frames.load(Ordering::Relaxed)
  }

  pub fn elapsed(&self) -> Duration {
    self.started.elapsed()
  }

  pub fn fps(&self) -> f64 {
    let secs = self.elapsed().as_secs_f64();
    if secs > 0.0 {
      self.frames() as f64 / secs
    } else {
      0.0
    }
  }
}

impl Default for FrameCounter {
  fn default() -> Self {
    Self::new()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn object(class_id: u32) -> DetectedObject {
    DetectedObject {
      class_id,
      confidence: 0.9,
      left: 0.0,
      top: 0.0,
      width: 10.0,
      height: 10.0,
    }
  }

  #[test]
  fn tally_counts_persons_among_objects() {
    let objects = [object(1), object(2), object(1)];
    let summary = FrameSummary::tally(7, &objects);
    assert_eq!(summary.frame, 7);
    assert_eq!(summary.objects, 3);
    assert_eq!(summary.persons, 2);
  }

  #[test]
  fn tally_of_empty_frame() {
    let summary = FrameSummary::tally(0, &[]);
    assert_eq!(summary.objects, 0);
    assert_eq!(summary.persons, 0);
  }

  #[test]
  fn summary_renders_json_line() {
    let summary = FrameSummary::tally(3, &[object(1)]);
    let value = summary.to_json();
    assert_eq!(value["frame"], 3);
    assert_eq!(value["persons"], 1);
    assert_eq!(value["person_label"], "person");
  }

  #[test]
  fn counter_accumulates() {
    let counter = FrameCounter::new();
    assert_eq!(counter.record(), 1);
    assert_eq!(counter.record(), 2);
    assert_eq!(counter.frames(), 2);
  }
}
