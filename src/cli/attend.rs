use std::path::PathBuf;

use clap::Parser;
use tokio::task::block_in_place;

use crate::cli::{OutputFormat, SubCommandExtend, open_station, print_output};
use crate::config::{MatchOptions, Opts, PipelineOptions};
use crate::ledger::{Attendance, Presence, RosterLedger};
use crate::utils;
use crate::vein::Frame;

#[derive(Parser, Debug, Clone)]
pub struct AttendCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 场次名称，与身份键组成签到记录标识
    pub session: String,
    /// 待识别的图片路径
    pub image: PathBuf,
    /// 签到名册，默认为数据目录下的 roster.json
    #[arg(long, value_name = "PATH")]
    pub roster: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
    /// 状态输出文件，例如串口设备
    #[arg(long, value_name = "PATH")]
    pub feedback: Option<PathBuf>,
}

impl SubCommandExtend for AttendCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let station =
            open_station(&opts.conf_dir, &self.pipeline, &self.matching, self.feedback.as_deref())?;
        let roster = self.roster.clone().unwrap_or_else(|| opts.conf_dir.roster());
        let ledger = RosterLedger::open(roster)?;
        let frame = Frame::new(utils::imread(&self.image)?);

        let outcome = block_in_place(|| station.attend(&frame, &ledger, &self.session))?;

        print_output(self.output_format, &outcome, |o| {
            println!("{}", o.decision);
            match &o.attendance {
                Some(Attendance::Seated { table }) => println!("签到成功，座位号 {}", table),
                Some(Attendance::AlreadyMarked) => println!("已签到"),
                Some(Attendance::NotFound) => println!("该场次没有此人的记录"),
                None => {}
            }
        })
    }
}

#[derive(Parser, Debug, Clone)]
pub struct AwayCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    /// 场次名称
    pub session: String,
    /// 待识别的图片路径
    pub image: PathBuf,
    /// 签到名册，默认为数据目录下的 roster.json
    #[arg(long, value_name = "PATH")]
    pub roster: Option<PathBuf>,
    /// 输出格式
    #[arg(long, value_name = "FORMAT", value_enum, default_value_t = OutputFormat::Table)]
    pub output_format: OutputFormat,
    /// 状态输出文件，例如串口设备
    #[arg(long, value_name = "PATH")]
    pub feedback: Option<PathBuf>,
}

impl SubCommandExtend for AwayCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let station =
            open_station(&opts.conf_dir, &self.pipeline, &self.matching, self.feedback.as_deref())?;
        let roster = self.roster.clone().unwrap_or_else(|| opts.conf_dir.roster());
        let ledger = RosterLedger::open(roster)?;
        let frame = Frame::new(utils::imread(&self.image)?);

        let outcome = block_in_place(|| station.away(&frame, &ledger, &self.session))?;

        print_output(self.output_format, &outcome, |o| {
            println!("{}", o.decision);
            match o.presence {
                Some(Presence::Out) => println!("已离场"),
                Some(Presence::Returned) => println!("已返回"),
                None => {}
            }
        })
    }
}
