// 该文件是 Guanque （鹳雀楼） 项目的一部分。
// src/pipeline.rs - DeepStream 管道装配
//
// 本程序遵循 GNU Affero 通用公共许可证（AGPL）许可协议。
// 本程序的发布旨在提供实用价值，但不作任何形式的担保，
// 包括但不限于对适销性或特定用途适用性的默示担保。
// 更多详情请参阅 GNU 通用公共许可证。
//
// Copyright (C) 2026 Johann Li <me@qinka.pro>, ETVP

//! # DeepStream 管道装配模块
//!
//! 把厂商提供的处理元件装配成 GPU 视频分析管道：
//!
//! ```text
//! uridecodebin → nvstreammux → nvinfer → nvtracker → nvvideoconvert → nvdsosd → sink
//! ```
//!
//! 推理、跟踪、渲染都发生在厂商元件内部；本模块只负责元件创建、
//! 属性配置、动态 pad 连接与总线消息轮询。
//!
//! ## 系统依赖
//!
//! 运行需要 NVIDIA DeepStream SDK（提供 `nvstreammux`、`nvinfer`、
//! `nvtracker`、`nvvideoconvert`、`nvdsosd` 等插件）以及 GStreamer 运行时。
//! `nvinfer` 的配置文件（`--infer-config`）负责加载 DETR 引擎并声明
//! `logits`/`boxes` 输出层与自定义解析函数。

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::{thread, time::Duration};

use gstreamer::{self as gst, prelude::*};
use thiserror::Error;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::stats::FrameCounter;

// 与部署的模型输入分辨率一致
const MUX_WIDTH: u32 = 1280;
const MUX_HEIGHT: u32 = 720;
const MUX_BATCH_SIZE: u32 = 1;
const MUX_BATCHED_PUSH_TIMEOUT_US: i32 = 40_000;
const TRACKER_WIDTH: u32 = 640;
const TRACKER_HEIGHT: u32 = 384;
const FILE_SINK_BITRATE: u32 = 4_000_000;
const BUS_POLL_INTERVAL_MS: u64 = 100;

const DEFAULT_INFER_CONFIG: &str = "config/config_infer_primary_detr.txt";
const DEFAULT_TRACKER_CONFIG: &str = "config/config_tracker_NvDCF_perf.yml";
const DEFAULT_TRACKER_LIB: &str =
  "/opt/nvidia/deepstream/deepstream/lib/libnvds_nvmultiobjecttracker.so";

#[derive(Error, Debug)]
pub enum PipelineError {
  #[error("GStreamer error: {0}")]
  GStreamer(#[from] gst::glib::Error),
  #[error("GStreamer boolean error: {0}")]
  GStreamerBool(#[from] gst::glib::BoolError),
  #[error("State change error: {0}")]
  StateChange(#[from] gst::StateChangeError),
  #[error("Failed to create element {factory} (is the DeepStream plugin installed?)")]
  MissingElement { factory: &'static str },
  #[error("Element {element} has no pad {pad}")]
  MissingPad {
    element: &'static str,
    pad: &'static str,
  },
  #[error("Config file not found: {0}")]
  ConfigNotFound(PathBuf),
  #[error("Invalid input URI: {0}")]
  InvalidUri(String),
  #[error("Pipeline bus unavailable")]
  BusUnavailable,
  #[error("Stream error from {source_name}: {message}")]
  Stream {
    source_name: String,
    message: String,
  },
}

/// 管道末端的输出方式
#[derive(Debug, Clone, Default)]
pub enum VideoSink {
  /// 本地 EGL 窗口显示
  #[default]
  Display,
  /// 丢弃输出，供无显示环境使用
  Fake,
  /// 编码为 H.264 并写入文件
  File(PathBuf),
}

/// 把输入参数规范化为 `uridecodebin` 可用的 URI。
///
/// 带 scheme 的字符串校验后原样通过，裸文件路径转换为 `file://` URI，
/// 路径必须已存在。
pub fn normalize_uri(input: &str) -> Result<String, PipelineError> {
  if let Ok(url) = Url::parse(input) {
    // 单字符 scheme 当作 Windows 盘符对待
    if url.scheme().len() > 1 {
      return Ok(url.into());
    }
  }

  let path = std::fs::canonicalize(input)
    .map_err(|_| PipelineError::InvalidUri(input.to_string()))?;
  Url::from_file_path(&path)
    .map(String::from)
    .map_err(|_| PipelineError::InvalidUri(input.to_string()))
}

/// DeepStream 检测管道构建器
///
/// # 示例
///
/// ```no_run
/// use guanque::pipeline::{DetectionPipelineBuilder, VideoSink};
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let pipeline = DetectionPipelineBuilder::new("file:///data/palace.mp4")
///     .sink(VideoSink::Fake)
///     .build()?;
/// pipeline.run()?;
/// # Ok(())
/// # }
/// ```
pub struct DetectionPipelineBuilder {
  uri: String,
  infer_config: PathBuf,
  tracker_config: PathBuf,
  tracker_lib: PathBuf,
  mux_size: (u32, u32),
  tracker_size: (u32, u32),
  sink: VideoSink,
}

impl DetectionPipelineBuilder {
  pub fn new(uri: impl Into<String>) -> Self {
    Self {
      uri: uri.into(),
      infer_config: PathBuf::from(DEFAULT_INFER_CONFIG),
      tracker_config: PathBuf::from(DEFAULT_TRACKER_CONFIG),
      tracker_lib: PathBuf::from(DEFAULT_TRACKER_LIB),
      mux_size: (MUX_WIDTH, MUX_HEIGHT),
      tracker_size: (TRACKER_WIDTH, TRACKER_HEIGHT),
      sink: VideoSink::default(),
    }
  }

  pub fn infer_config(mut self, path: impl Into<PathBuf>) -> Self {
    self.infer_config = path.into();
    self
  }

  pub fn tracker_config(mut self, path: impl Into<PathBuf>) -> Self {
    self.tracker_config = path.into();
    self
  }

  pub fn tracker_lib(mut self, path: impl Into<PathBuf>) -> Self {
    self.tracker_lib = path.into();
    self
  }

  pub fn mux_size(mut self, width: u32, height: u32) -> Self {
    self.mux_size = (width, height);
    self
  }

  pub fn tracker_size(mut self, width: u32, height: u32) -> Self {
    self.tracker_size = (width, height);
    self
  }

  pub fn sink(mut self, sink: VideoSink) -> Self {
    self.sink = sink;
    self
  }

  pub fn build(self) -> Result<DetectionPipeline, PipelineError> {
    // 元件失败前先校验配置文件，错误信息更直接
    for path in [&self.infer_config, &self.tracker_config] {
      if !path.is_file() {
        error!("配置文件不存在: {}", path.display());
        return Err(PipelineError::ConfigNotFound(path.clone()));
      }
    }
    if !self.tracker_lib.is_file() {
      warn!(
        "跟踪器库不存在: {}，交由 nvtracker 自行定位",
        self.tracker_lib.display()
      );
    }

    gst::init()?;

    let pipeline = gst::Pipeline::builder().name("detr-pipeline").build();

    let source = make_element("uridecodebin", "source")?;
    source.set_property("uri", self.uri.as_str());

    let streammux = make_element("nvstreammux", "stream-muxer")?;
    streammux.set_property("width", self.mux_size.0);
    streammux.set_property("height", self.mux_size.1);
    streammux.set_property("batch-size", MUX_BATCH_SIZE);
    streammux.set_property("batched-push-timeout", MUX_BATCHED_PUSH_TIMEOUT_US);

    let pgie = make_element("nvinfer", "primary-inference")?;
    pgie.set_property(
      "config-file-path",
      self.infer_config.display().to_string(),
    );

    let tracker = make_element("nvtracker", "tracker")?;
    tracker.set_property("tracker-width", self.tracker_size.0);
    tracker.set_property("tracker-height", self.tracker_size.1);
    tracker.set_property("ll-lib-file", self.tracker_lib.display().to_string());
    tracker.set_property(
      "ll-config-file",
      self.tracker_config.display().to_string(),
    );
    tracker.set_property("gpu-id", 0u32);

    let nvvidconv = make_element("nvvideoconvert", "convert")?;
    let nvosd = make_element("nvdsosd", "onscreendisplay")?;

    let mut chain = vec![
      streammux.clone(),
      pgie,
      tracker,
      nvvidconv,
      nvosd.clone(),
    ];

    match &self.sink {
      VideoSink::Display => {
        let sink = make_element("nveglglessink", "video-sink")?;
        sink.set_property("sync", false);
        chain.push(sink);
      }
      VideoSink::Fake => {
        let sink = make_element("fakesink", "video-sink")?;
        sink.set_property("sync", false);
        chain.push(sink);
      }
      VideoSink::File(path) => {
        let encoder = make_element("nvv4l2h264enc", "encoder")?;
        encoder.set_property("bitrate", FILE_SINK_BITRATE);
        encoder.set_property("insert-sps-pps", true);
        encoder.set_property("iframeinterval", 30u32);
        let parser = make_element("h264parse", "parser")?;
        let muxer = make_element("qtmux", "muxer")?;
        let filesink = make_element("filesink", "file-sink")?;
        filesink.set_property("location", path.display().to_string());
        filesink.set_property("sync", false);
        filesink.set_property("async", false);
        chain.extend([encoder, parser, muxer, filesink]);
      }
    }

    pipeline.add(&source)?;
    pipeline.add_many(chain.iter())?;
    gst::Element::link_many(chain.iter())?;

    // uridecodebin 的视频 pad 在运行时才出现，
    // 只把第一个视频 pad 接到 streammux 的请求 pad 上
    let mux = streammux;
    let linked = Arc::new(AtomicBool::new(false));
    source.connect_pad_added(move |_, src_pad| {
      let is_video = src_pad
        .current_caps()
        .and_then(|caps| caps.structure(0).map(|s| s.name().starts_with("video/")))
        .unwrap_or(false);
      if !is_video {
        debug!("忽略非视频 pad: {}", src_pad.name());
        return;
      }
      if linked.swap(true, Ordering::SeqCst) {
        debug!("视频 pad 已连接，忽略额外的 pad");
        return;
      }
      let Some(sink_pad) = mux.request_pad_simple("sink_0") else {
        error!("无法从 streammux 请求 sink_0 pad");
        return;
      };
      match src_pad.link(&sink_pad) {
        Ok(_) => info!("源视频 pad 已连接到 streammux"),
        Err(err) => error!("源 pad 连接失败: {:?}", err),
      }
    });

    // OSD sink pad 上的缓冲区探针，统计通过的帧
    let counter = Arc::new(FrameCounter::new());
    let probe_counter = Arc::clone(&counter);
    let osd_sink_pad = nvosd
      .static_pad("sink")
      .ok_or(PipelineError::MissingPad {
        element: "nvdsosd",
        pad: "sink",
      })?;
    let _ = osd_sink_pad.add_probe(gst::PadProbeType::BUFFER, move |_, _| {
      let frame = probe_counter.record();
      debug!("第 {} 帧通过 OSD", frame);
      gst::PadProbeReturn::Ok
    });

    Ok(DetectionPipeline { pipeline, counter })
  }
}

/// DeepStream 检测管道
pub struct DetectionPipeline {
  pipeline: gst::Pipeline,
  counter: Arc<FrameCounter>,
}

impl DetectionPipeline {
  /// 启动管道并轮询总线直到流结束、出错或收到中断信号
  pub fn run(&self) -> Result<(), PipelineError> {
    let bus = self.pipeline.bus().ok_or(PipelineError::BusUnavailable)?;

    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
      info!("收到中断信号，准备退出...");
      let _ = tx.send(());
      thread::spawn(|| {
        thread::sleep(Duration::from_secs(30));
        warn!("强制退出程序");
        std::process::exit(1);
      });
    })
    .expect("Error setting Ctrl-C handler");

    self.pipeline.set_state(gst::State::Playing)?;
    info!("DeepStream 管道已启动");

    let mut outcome = Ok(());
    loop {
      if rx.try_recv().is_ok() {
        warn!("中断信号接收，退出管道循环");
        break;
      }

      let Some(msg) = bus.timed_pop(gst::ClockTime::from_mseconds(BUS_POLL_INTERVAL_MS)) else {
        continue;
      };

      match msg.view() {
        gst::MessageView::Eos(..) => {
          info!("输入流结束");
          break;
        }
        gst::MessageView::Error(err) => {
          let source_name = err
            .src()
            .map(|src| src.path_string().to_string())
            .unwrap_or_else(|| String::from("unknown"));
          let debug_info = err.debug().map(|d| d.to_string()).unwrap_or_default();
          error!("管道错误 ({}): {} {}", source_name, err.error(), debug_info);
          outcome = Err(PipelineError::Stream {
            source_name,
            message: err.error().to_string(),
          });
          break;
        }
        _ => {}
      }
    }

    self.pipeline.set_state(gst::State::Null)?;
    info!(
      "管道已停止: 共 {} 帧, 耗时 {:.2?}, 平均 {:.1} fps",
      self.counter.frames(),
      self.counter.elapsed(),
      self.counter.fps()
    );

    outcome
  }

  pub fn frames(&self) -> u64 {
    self.counter.frames()
  }
}

fn make_element(factory: &'static str, name: &str) -> Result<gst::Element, PipelineError> {
  gst::ElementFactory::make(factory)
    .name(name)
    .build()
    .map_err(|_| {
      error!("无法创建元素 {}（DeepStream 插件缺失?）", factory);
      PipelineError::MissingElement { factory }
    })
}
