use std::convert::Infallible;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::LazyLock;

use clap::builder::RangedU64ValueParser;
use clap::{Parser, Subcommand};
use directories::ProjectDirs;

use crate::cli::*;
use crate::store::HandSide;
use crate::vein::enhance::Enhancement;
use crate::vein::features::FeatureLayout;
use crate::vein::vessel::VesselStrategy;

static CONF_DIR: LazyLock<ConfDir> = LazyLock::new(|| {
    let path = ProjectDirs::from("", "palmvein", "palmvein")
        .map(|dirs| dirs.config_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".palmvein"));
    ConfDir { path }
});

fn default_config_dir() -> &'static str {
    CONF_DIR.path().to_str().unwrap_or(".palmvein")
}

/// 特征提取流水线参数
#[derive(Parser, Debug, Clone)]
pub struct PipelineOptions {
    /// 手掌区域缩放后的边长
    #[arg(
        long,
        value_name = "PIXELS",
        default_value_t = 512,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub roi_size: i32,
    /// 分离手掌与背景的二值化阈值
    #[arg(long, value_name = "THRESHOLD", default_value_t = 45.)]
    pub hand_threshold: f64,
    /// 手掌轮廓的最小面积，小于此值视为未检测到手掌
    #[arg(long, value_name = "AREA", default_value_t = 6000.)]
    pub hand_min_area: f64,
    /// 裁剪手掌区域时外接矩形四周保留的边距
    #[arg(long, value_name = "PIXELS", default_value_t = 20)]
    pub roi_margin: i32,
    /// 允许校正的最大倾斜角度，超过此角度不旋转
    #[arg(long, value_name = "DEGREES", default_value_t = 30.)]
    pub max_tilt: f32,
    /// 不进行双边滤波去噪
    #[arg(long)]
    pub no_denoise: bool,
    /// 对比度增强方式
    #[arg(long, value_enum, default_value_t = Enhancement::Clahe)]
    pub enhance: Enhancement,
    /// CLAHE 对比度限制
    #[arg(long, value_name = "CLIP", default_value_t = 3.0)]
    pub clahe_clip: f64,
    /// CLAHE 网格数量
    #[arg(
        long,
        value_name = "N",
        default_value_t = 8,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub clahe_tiles: i32,
    /// 血管增强方式
    #[arg(long, value_enum, default_value_t = VesselStrategy::Blackhat)]
    pub vessel: VesselStrategy,
    /// 黑帽变换结构元素的尺寸，约等于静脉宽度
    #[arg(
        long,
        value_name = "PIXELS",
        default_value_t = 25,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub vein_kernel: i32,
    /// 黑帽变换后二次 CLAHE 的对比度限制
    #[arg(long, value_name = "CLIP", default_value_t = 4.0)]
    pub vessel_boost_clip: f64,
    /// 多尺度血管滤波使用的尺度
    #[arg(long, value_name = "SIGMA", value_delimiter = ',', default_value = "2,4,6,8")]
    pub vesselness_scales: Vec<f64>,
    /// 自适应阈值的窗口大小，必须为奇数
    #[arg(long, value_name = "PIXELS", default_value_t = 25)]
    pub adaptive_block: i32,
    /// 自适应阈值的偏移量
    #[arg(long, value_name = "C", default_value_t = -4., allow_hyphen_values = true)]
    pub adaptive_offset: f64,
    /// 连通区域的最小面积，小于此值的区域视为噪点
    #[arg(long, value_name = "AREA", default_value_t = 100)]
    pub min_object_area: i32,
    /// 去除远离掌心的骨架像素
    #[arg(long)]
    pub periphery: bool,
    /// 保留的骨架像素到中心的最大距离，占最大距离的比例
    #[arg(long, value_name = "RATIO", default_value_t = 0.7)]
    pub periphery_ratio: f64,
    /// 特征向量布局
    #[arg(long, value_enum, default_value_t = FeatureLayout::Compact)]
    pub layout: FeatureLayout,
    /// 紧凑布局中密度网格的单元边长
    #[arg(
        long,
        value_name = "PIXELS",
        default_value_t = 32,
        value_parser = clap::value_parser!(i32).range(1..)
    )]
    pub grid_cell: i32,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::parse_from(["pipeline"])
    }
}

/// 匹配参数
#[derive(Parser, Debug, Clone)]
pub struct MatchOptions {
    /// 判定为同一身份的最低相似度
    #[arg(short, long, value_name = "SCORE", default_value_t = 0.90)]
    pub threshold: f32,
    /// 每个身份取相似度最高的 K 个模板求平均
    #[arg(
        long,
        value_name = "K",
        default_value_t = 2,
        value_parser = RangedU64ValueParser::<usize>::new().range(1..)
    )]
    pub top_k: usize,
}

impl Default for MatchOptions {
    fn default() -> Self {
        Self::parse_from(["match"])
    }
}

/// 采集质量门限参数
#[derive(Parser, Debug, Clone)]
pub struct QualityOptions {
    /// 连续评估采集端的画面，手掌稳定居中后才采集
    #[arg(long)]
    pub quality_gate: bool,
    /// 自动采集所需的最低质量分数，满分 100
    #[arg(long, value_name = "SCORE", default_value_t = 85.)]
    pub capture_score: f32,
    /// 两次自动采集之间的最短间隔
    #[arg(long, value_name = "SECONDS", default_value_t = 3.)]
    pub capture_cooldown: f64,
}

impl Default for QualityOptions {
    fn default() -> Self {
        Self::parse_from(["quality"])
    }
}

/// 登记参数
#[derive(Parser, Debug, Clone)]
pub struct EnrollOptions {
    /// 每个身份需要采集的样本数量
    #[arg(
        long,
        value_name = "N",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=16)
    )]
    pub samples: u32,
    /// 手掌侧别
    #[arg(long, value_enum, default_value_t = HandSide::Right)]
    pub side: HandSide,
}

impl Default for EnrollOptions {
    fn default() -> Self {
        Self::parse_from(["enroll"])
    }
}

#[derive(Parser, Debug, Clone)]
#[command(name = "palmvein", version)]
pub struct Opts {
    #[command(subcommand)]
    pub subcmd: SubCommand,
    /// palmvein 数据目录
    #[arg(short, long, default_value = default_config_dir())]
    pub conf_dir: ConfDir,
}

#[derive(Subcommand, Debug, Clone)]
pub enum SubCommand {
    /// 采集多个样本并登记新身份
    Enroll(EnrollCommand),
    /// 识别一张手掌图片
    Verify(VerifyCommand),
    /// 识别并签到
    Attend(AttendCommand),
    /// 识别并切换离场/返回状态
    Away(AwayCommand),
    /// 从目录批量导入身份
    Import(ImportCommand),
    /// 列出已登记的身份
    List(ListCommand),
    /// 删除身份及其全部模板
    Delete(DeleteCommand),
    /// 输出流水线每个阶段的中间图像
    Show(ShowCommand),
    /// 启动 HTTP 识别服务
    Server(ServerCommand),
}

/// 数据目录
///
/// ```text
/// <conf_dir>/
///   index/                         LMDB 身份索引
///   templates/<key>/<side>/        特征向量 vec_<hash>.npy 与原图 img_<hash>.png
///   roster.json                    本地签到名册
/// ```
#[derive(Debug, Clone)]
pub struct ConfDir {
    path: PathBuf,
}

impl ConfDir {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self { path: path.as_ref().to_path_buf() }
    }

    pub fn path(&self) -> &Path {
        self.path.as_path()
    }

    /// 返回 LMDB 索引目录
    pub fn index(&self) -> PathBuf {
        self.path.join("index")
    }

    /// 返回模板根目录
    pub fn templates(&self) -> PathBuf {
        self.path.join("templates")
    }

    /// 返回某个身份的模板目录
    pub fn identity_dir(&self, key: &str) -> PathBuf {
        self.templates().join(key)
    }

    /// 返回某个身份某一侧手掌的模板目录
    pub fn side_dir(&self, key: &str, side: HandSide) -> PathBuf {
        self.identity_dir(key).join(side.as_str())
    }

    /// 返回本地签到名册路径
    pub fn roster(&self) -> PathBuf {
        self.path.join("roster.json")
    }
}

impl FromStr for ConfDir {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_defaults() {
        let opts = PipelineOptions::default();
        assert_eq!(opts.roi_size, 512);
        assert_eq!(opts.adaptive_offset, -4.);
        assert_eq!(opts.vesselness_scales, vec![2., 4., 6., 8.]);
        assert_eq!(opts.layout, FeatureLayout::Compact);
        assert!(!opts.periphery);
    }

    #[test]
    fn test_negative_offset_parses() {
        let opts = PipelineOptions::parse_from([
            "p",
            "--adaptive-offset",
            "-5",
            "--vesselness-scales",
            "1,3",
        ]);
        assert_eq!(opts.adaptive_offset, -5.);
        assert_eq!(opts.vesselness_scales, vec![1., 3.]);
    }

    #[test]
    fn test_zero_sizes_are_rejected() {
        for flag in ["--roi-size", "--grid-cell", "--clahe-tiles", "--vein-kernel"] {
            assert!(PipelineOptions::try_parse_from(["p", flag, "0"]).is_err(), "{}", flag);
        }
        assert!(MatchOptions::try_parse_from(["m", "--top-k", "0"]).is_err());
        assert_eq!(MatchOptions::try_parse_from(["m", "--top-k", "3"]).unwrap().top_k, 3);
        let opts = PipelineOptions::try_parse_from(["p", "--grid-cell", "1"]).unwrap();
        assert_eq!(opts.grid_cell, 1);
    }

    #[test]
    fn test_quality_defaults() {
        let opts = QualityOptions::default();
        assert!(!opts.quality_gate);
        assert_eq!(opts.capture_score, 85.);
        assert_eq!(opts.capture_cooldown, 3.);
    }

    #[test]
    fn test_conf_dir_layout() {
        let dir = ConfDir::new("/data");
        assert_eq!(dir.index(), PathBuf::from("/data/index"));
        assert_eq!(
            dir.side_dir("A123456789", HandSide::Right),
            PathBuf::from("/data/templates/A123456789/Right")
        );
    }
}
