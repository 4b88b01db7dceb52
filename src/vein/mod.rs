//! 掌静脉特征提取流水线
//!
//! 每个阶段接收上一阶段的只读结果并返回新的图像，
//! 阶段之间的先后顺序由类型保证：`Frame → Roi → Enhanced → VesselMap → Skeleton`。

pub mod enhance;
pub mod features;
pub mod pipeline;
pub mod quality;
pub mod roi;
pub mod segment;
pub mod vessel;

use opencv::core::Mat;
use opencv::prelude::*;

pub use features::{Embedder, FeatureLayout};
pub use pipeline::{Pipeline, StageImages};
pub use quality::{Admission, CaptureGate, HandQuality};

macro_rules! raster {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug)]
        pub struct $name(Mat);

        impl $name {
            pub fn new(mat: Mat) -> Self {
                Self(mat)
            }

            pub fn mat(&self) -> &Mat {
                &self.0
            }

            pub fn into_mat(self) -> Mat {
                self.0
            }

            /// 返回 `(宽, 高)`
            pub fn dimensions(&self) -> (i32, i32) {
                (self.0.cols(), self.0.rows())
            }
        }
    };
}

raster!(
    /// 采集端返回的原始图像，灰度或 BGR 彩色
    Frame
);
raster!(
    /// 去除背景、校正方向并缩放到固定尺寸的手掌区域
    Roi
);
raster!(
    /// 对比度增强后的灰度图
    Enhanced
);
raster!(
    /// 血管增强响应，静脉为高亮
    VesselMap
);
raster!(
    /// 单像素宽的静脉骨架，前景为 255
    Skeleton
);
