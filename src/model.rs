// 该文件是 Guanque （鹳雀楼） 项目的一部分。
// src/model.rs - 模型输出数据定义
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

/// 推理引擎交给解析器的单个输出层视图。
///
/// 缓冲区由引擎持有，仅在一次 `parse_outputs` 调用期间有效；
/// 解析器不得在返回后保留任何引用。
#[derive(Debug, Clone, Copy)]
pub struct OutputLayer<'a> {
  /// 输出层名称（模型导出时指定）
  pub name: &'a str,
  /// 维度向量，不含 batch 维
  pub dims: &'a [usize],
  /// 连续的 float32 数据
  pub buffer: &'a [f32],
}

/// 网络静态输入几何（像素）
#[derive(Debug, Clone, Copy)]
pub struct NetworkInfo {
  pub width: u32,
  pub height: u32,
}

/// 检测过滤参数，阈值按类别编号 0..N-1 索引
#[derive(Debug, Clone)]
pub struct DetectionParams {
  pub num_classes: usize,
  pub per_class_threshold: Box<[f32]>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DetectedObject {
  pub class_id: u32,
  pub confidence: f32,
  /// 边界框左上角与宽高（像素）
  pub left: f32,
  pub top: f32,
  pub width: f32,
  pub height: f32,
}

#[derive(Debug, Clone)]
pub struct DetectResult {
  pub objects: Box<[DetectedObject]>,
}

/// 推理引擎要求解析器实现的能力集：
/// 一对生命周期空操作、输出解析、默认参数工厂。
pub trait OutputParser {
  type Error;

  fn initialize(&mut self) -> Result<(), Self::Error>;

  fn parse_outputs(
    &self,
    layers: &[OutputLayer<'_>],
    network: &NetworkInfo,
    params: &DetectionParams,
  ) -> Result<DetectResult, Self::Error>;

  fn default_params() -> DetectionParams;

  fn deinitialize(&mut self);
}

mod detr;
pub use self::detr::{
  DETR_DEFAULT_THRESHOLD, DETR_NUM_CLASSES, DETR_PERSON_CLASS, DetrParser, DetrParserError,
};
