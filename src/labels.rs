// 该文件是 Guanque （鹳雀楼） 项目的一部分。
// src/labels.rs - COCO 标签表
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

/// DETR 部署使用的 91 槽位 COCO 标签表，与 `config/labels_coco.txt` 一致。
/// 空缺槽位标记为 "N/A"，不会出现在解析结果里。
pub const COCO_LABELS: [&str; 91] = [
  "N/A",
  "person",
  "bicycle",
  "car",
  "motorcycle",
  "airplane",
  "bus",
  "train",
  "truck",
  "boat",
  "traffic light",
  "fire hydrant",
  "N/A",
  "stop sign",
  "parking meter",
  "bench",
  "bird",
  "cat",
  "dog",
  "horse",
  "sheep",
  "cow",
  "elephant",
  "bear",
  "zebra",
  "giraffe",
  "N/A",
  "backpack",
  "umbrella",
  "N/A",
  "N/A",
  "handbag",
  "tie",
  "suitcase",
  "frisbee",
  "skis",
  "snowboard",
  "sports ball",
  "kite",
  "baseball bat",
  "baseball glove",
  "skateboard",
  "surfboard",
  "tennis racket",
  "bottle",
  "N/A",
  "wine glass",
  "cup",
  "fork",
  "knife",
  "spoon",
  "bowl",
  "banana",
  "apple",
  "sandwich",
  "orange",
  "broccoli",
  "carrot",
  "hot dog",
  "pizza",
  "donut",
  "cake",
  "chair",
  "couch",
  "potted plant",
  "bed",
  "N/A",
  "dining table",
  "N/A",
  "N/A",
  "toilet",
  "N/A",
  "tv",
  "laptop",
  "mouse",
  "remote",
  "keyboard",
  "cell phone",
  "microwave",
  "oven",
  "toaster",
  "sink",
  "refrigerator",
  "N/A",
  "book",
  "clock",
  "vase",
  "scissors",
  "teddy bear",
  "hair drier",
  "toothbrush",
];

/// 类别编号对应的标签名，超出范围返回 None
pub fn label_str(class_id: u32) -> Option<&'static str> {
  COCO_LABELS.get(class_id as usize).copied()
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::model::DETR_PERSON_CLASS;

  #[test]
  fn person_is_class_one() {
    assert_eq!(label_str(DETR_PERSON_CLASS), Some("person"));
  }

  #[test]
  fn out_of_range_is_none() {
    assert_eq!(label_str(91), None);
  }
}
