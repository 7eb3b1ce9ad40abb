// 该文件是 Guanque （鹳雀楼） 项目的一部分。
// src/main.rs - 项目主程序
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;

use guanque::pipeline::{DetectionPipelineBuilder, VideoSink, normalize_uri};

/// Guanque 行人检测与跟踪管道参数
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
  /// 输入视频 URI（file://、rtsp:// 等，裸文件路径会自动转换）
  #[arg(value_name = "URI")]
  uri: String,

  /// 主推理元件（nvinfer）配置文件
  #[arg(
    long,
    value_name = "FILE",
    default_value = "config/config_infer_primary_detr.txt"
  )]
  infer_config: PathBuf,

  /// 跟踪器配置文件
  #[arg(
    long,
    value_name = "FILE",
    default_value = "config/config_tracker_NvDCF_perf.yml"
  )]
  tracker_config: PathBuf,

  /// 跟踪器底层库路径
  #[arg(
    long,
    value_name = "FILE",
    default_value = "/opt/nvidia/deepstream/deepstream/lib/libnvds_nvmultiobjecttracker.so"
  )]
  tracker_lib: PathBuf,

  /// 把结果编码写入文件而不是屏幕显示
  #[arg(long, value_name = "OUTPUT")]
  output: Option<PathBuf>,

  /// 使用 fakesink（无显示环境测试）
  #[arg(long)]
  fake_sink: bool,
}

fn main() -> Result<()> {
  tracing_subscriber::fmt::init();

  let args = Args::parse();

  let uri = normalize_uri(&args.uri).context("输入 URI 无效")?;
  info!("输入来源: {}", uri);
  info!("推理配置: {}", args.infer_config.display());
  info!("跟踪配置: {}", args.tracker_config.display());

  let sink = if let Some(output) = args.output {
    info!("输出文件: {}", output.display());
    VideoSink::File(output)
  } else if args.fake_sink {
    VideoSink::Fake
  } else {
    VideoSink::Display
  };

  let pipeline = DetectionPipelineBuilder::new(uri)
    .infer_config(args.infer_config)
    .tracker_config(args.tracker_config)
    .tracker_lib(args.tracker_lib)
    .sink(sink)
    .build()
    .context("构建 DeepStream 管道失败")?;

  pipeline.run().context("管道运行失败")?;

  Ok(())
}
