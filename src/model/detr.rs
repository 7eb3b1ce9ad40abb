// 该文件是 Guanque （鹳雀楼） 项目的一部分。
// src/model/detr.rs - DETR 输出解析
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # DETR 输出解析模块
//!
//! 把 DETR 集合预测模型的两个输出张量（`logits` 每查询类别打分，
//! `boxes` 每查询归一化中心框）解码为像素坐标的检测对象列表。
//! 解析器无内部状态，每个推理批次由引擎同步调用一次。

use thiserror::Error;
use tracing::debug;

use crate::model::{
  DetectResult, DetectedObject, DetectionParams, NetworkInfo, OutputLayer, OutputParser,
};

/// 部署的 COCO 标签方案共 91 个类别槽位
pub const DETR_NUM_CLASSES: usize = 91;
/// 默认的每类置信度阈值
pub const DETR_DEFAULT_THRESHOLD: f32 = 0.2;
/// 标签方案中 1 号类别为行人
pub const DETR_PERSON_CLASS: u32 = 1;

const BBOX_LAYER_NAME: &str = "boxes";
const LOGITS_LAYER_NAME: &str = "logits";
const BBOX_COORDS: usize = 4;

#[derive(Error, Debug)]
pub enum DetrParserError {
  #[error("缺少期望的输出层: {0}")]
  MissingLayer(&'static str),
  #[error("输出层 {name} 形状无效: {reason}")]
  MalformedLayer { name: &'static str, reason: String },
  #[error("检测参数无效: 未配置任何类别阈值")]
  EmptyThresholds,
}

/// DETR 输出解析器。
///
/// 只保留获胜类别落在 `accepted_classes` 内的查询，
/// 默认只接受行人类别（沿用部署行为，可覆盖）。
#[derive(Debug, Clone)]
pub struct DetrParser {
  accepted_classes: Box<[u32]>,
}

impl Default for DetrParser {
  fn default() -> Self {
    Self {
      accepted_classes: Box::new([DETR_PERSON_CLASS]),
    }
  }
}

impl DetrParser {
  pub fn new() -> Self {
    Self::default()
  }

  /// 覆盖接受的类别集合
  pub fn with_accepted_classes(classes: impl IntoIterator<Item = u32>) -> Self {
    Self {
      accepted_classes: classes.into_iter().collect(),
    }
  }

  pub fn accepted_classes(&self) -> &[u32] {
    &self.accepted_classes
  }
}

/// 在输出层列表中按名字精确查找
fn find_layer<'a>(
  layers: &'a [OutputLayer<'a>],
  name: &'static str,
) -> Result<&'a OutputLayer<'a>, DetrParserError> {
  layers
    .iter()
    .find(|layer| layer.name == name)
    .ok_or(DetrParserError::MissingLayer(name))
}

/// 推导查询数 Q 与类别数 C，并校验两个缓冲区的长度。
///
/// 维度或缓冲区长度不一致显式快速失败，Q = 0 是合法的空批次。
fn checked_geometry(
  logits: &OutputLayer<'_>,
  boxes: &OutputLayer<'_>,
) -> Result<(usize, usize), DetrParserError> {
  if logits.dims.len() < 2 {
    return Err(DetrParserError::MalformedLayer {
      name: LOGITS_LAYER_NAME,
      reason: format!("期望至少 2 个维度, 实际为 {}", logits.dims.len()),
    });
  }

  let num_queries = logits.dims[0];
  let num_classes = logits.dims[1];

  if num_queries > 0 && num_classes == 0 {
    return Err(DetrParserError::MalformedLayer {
      name: LOGITS_LAYER_NAME,
      reason: "类别维度为 0".to_string(),
    });
  }

  if logits.buffer.len() != num_queries * num_classes {
    return Err(DetrParserError::MalformedLayer {
      name: LOGITS_LAYER_NAME,
      reason: format!(
        "期望缓冲区长度为 {}, 实际为 {}",
        num_queries * num_classes,
        logits.buffer.len()
      ),
    });
  }

  if boxes.buffer.len() != num_queries * BBOX_COORDS {
    return Err(DetrParserError::MalformedLayer {
      name: BBOX_LAYER_NAME,
      reason: format!(
        "期望缓冲区长度为 {}, 实际为 {}",
        num_queries * BBOX_COORDS,
        boxes.buffer.len()
      ),
    });
  }

  Ok((num_queries, num_classes))
}

impl OutputParser for DetrParser {
  type Error = DetrParserError;

  fn initialize(&mut self) -> Result<(), Self::Error> {
    Ok(())
  }

  fn parse_outputs(
    &self,
    layers: &[OutputLayer<'_>],
    network: &NetworkInfo,
    params: &DetectionParams,
  ) -> Result<DetectResult, Self::Error> {
    let boxes = find_layer(layers, BBOX_LAYER_NAME)?;
    let logits = find_layer(layers, LOGITS_LAYER_NAME)?;

    let (num_queries, num_classes) = checked_geometry(logits, boxes)?;
    debug!("num_queries={}, num_classes={}", num_queries, num_classes);

    // 全局阈值：沿用部署行为，0 号类别的阈值作为所有类别的起始下限
    let floor = params
      .per_class_threshold
      .first()
      .copied()
      .ok_or(DetrParserError::EmptyThresholds)?;

    let net_w = network.width as f32;
    let net_h = network.height as f32;

    let mut objects = Vec::new();

    for i in 0..num_queries {
      let row = &logits.buffer[i * num_classes..(i + 1) * num_classes];

      // 原始打分上的 arg-max，非 softmax
      let mut best_score = floor;
      let mut best_class = None;
      for (class_id, &score) in row.iter().enumerate() {
        if score > best_score {
          best_score = score;
          best_class = Some(class_id as u32);
        }
      }

      let Some(class_id) = best_class else {
        continue;
      };
      if !self.accepted_classes.contains(&class_id) {
        continue;
      }

      let bbox = &boxes.buffer[i * BBOX_COORDS..(i + 1) * BBOX_COORDS];
      let cx = bbox[0] * net_w;
      let cy = bbox[1] * net_h;
      let w = bbox[2] * net_w;
      let h = bbox[3] * net_h;

      objects.push(DetectedObject {
        class_id,
        confidence: best_score,
        left: cx - w / 2.0,
        top: cy - h / 2.0,
        width: w,
        height: h,
      });
    }

    debug!("检测到 {} 个物体", objects.len());

    Ok(DetectResult {
      objects: objects.into_boxed_slice(),
    })
  }

  fn default_params() -> DetectionParams {
    DetectionParams {
      num_classes: DETR_NUM_CLASSES,
      per_class_threshold: vec![DETR_DEFAULT_THRESHOLD; DETR_NUM_CLASSES].into_boxed_slice(),
    }
  }

  fn deinitialize(&mut self) {}
}

#[cfg(test)]
mod tests {
  use super::*;

  const NETWORK: NetworkInfo = NetworkInfo {
    width: 1280,
    height: 720,
  };

  fn params() -> DetectionParams {
    DetrParser::default_params()
  }

  fn parse(
    logits_dims: &[usize],
    logits: &[f32],
    boxes: &[f32],
  ) -> Result<DetectResult, DetrParserError> {
    let boxes_dims = [logits_dims[0], BBOX_COORDS];
    let layers = [
      OutputLayer {
        name: "boxes",
        dims: &boxes_dims,
        buffer: boxes,
      },
      OutputLayer {
        name: "logits",
        dims: logits_dims,
        buffer: logits,
      },
    ];
    DetrParser::new().parse_outputs(&layers, &NETWORK, &params())
  }

  #[test]
  fn argmax_emits_winning_person_score() {
    // 1 个查询 3 个类别，1 号类别唯一最大且超过阈值
    let logits = [0.1, 0.9, 0.3];
    let boxes = [0.5, 0.5, 0.2, 0.4];
    let result = parse(&[1, 3], &logits, &boxes).unwrap();

    assert_eq!(result.objects.len(), 1);
    assert_eq!(result.objects[0].class_id, 1);
    assert!((result.objects[0].confidence - 0.9).abs() < 1e-6);
  }

  #[test]
  fn non_person_winner_is_dropped() {
    // 2 号类别获胜，置信度再高也不输出
    let logits = [0.1, 0.3, 0.99];
    let boxes = [0.5, 0.5, 0.2, 0.4];
    let result = parse(&[1, 3], &logits, &boxes).unwrap();
    assert!(result.objects.is_empty());
  }

  #[test]
  fn score_at_floor_is_dropped() {
    // 等于阈值不算超过，查询被丢弃
    let logits = [0.1, DETR_DEFAULT_THRESHOLD, 0.05];
    let boxes = [0.5, 0.5, 0.2, 0.4];
    let result = parse(&[1, 3], &logits, &boxes).unwrap();
    assert!(result.objects.is_empty());
  }

  #[test]
  fn boxes_scale_to_network_pixels() {
    let logits = [0.0, 0.8];
    let boxes = [0.5, 0.5, 0.2, 0.4];
    let result = parse(&[1, 2], &logits, &boxes).unwrap();

    let obj = &result.objects[0];
    assert!((obj.left - 512.0).abs() < 1e-4);
    assert!((obj.top - 216.0).abs() < 1e-4);
    assert!((obj.width - 256.0).abs() < 1e-4);
    assert!((obj.height - 288.0).abs() < 1e-4);
  }

  #[test]
  fn empty_batch_yields_empty_result() {
    let result = parse(&[0, 3], &[], &[]).unwrap();
    assert!(result.objects.is_empty());
  }

  #[test]
  fn logits_buffer_mismatch_fails() {
    // 声明 2x3 却只给 5 个值
    let logits = [0.1; 5];
    let boxes = [0.5; 8];
    let err = parse(&[2, 3], &logits, &boxes).unwrap_err();
    assert!(matches!(
      err,
      DetrParserError::MalformedLayer { name: "logits", .. }
    ));
  }

  #[test]
  fn boxes_row_count_mismatch_fails() {
    let logits = [0.1; 6];
    let boxes = [0.5; 4];
    let err = parse(&[2, 3], &logits, &boxes).unwrap_err();
    assert!(matches!(
      err,
      DetrParserError::MalformedLayer { name: "boxes", .. }
    ));
  }

  #[test]
  fn configured_classes_override_person_filter() {
    let parser = DetrParser::with_accepted_classes([1, 2]);
    let logits = [0.1, 0.3, 0.99];
    let boxes = [0.5, 0.5, 0.2, 0.4];
    let boxes_dims = [1, BBOX_COORDS];
    let logits_dims = [1, 3];
    let layers = [
      OutputLayer {
        name: "boxes",
        dims: &boxes_dims,
        buffer: &boxes,
      },
      OutputLayer {
        name: "logits",
        dims: &logits_dims,
        buffer: &logits,
      },
    ];
    let result = parser.parse_outputs(&layers, &NETWORK, &params()).unwrap();
    assert_eq!(result.objects.len(), 1);
    assert_eq!(result.objects[0].class_id, 2);
  }

  #[test]
  fn default_params_cover_91_classes() {
    let params = DetrParser::default_params();
    assert_eq!(params.num_classes, 91);
    assert_eq!(params.per_class_threshold.len(), 91);
    assert!(
      params
        .per_class_threshold
        .iter()
        .all(|&t| (t - 0.2).abs() < 1e-6)
    );
  }
}
