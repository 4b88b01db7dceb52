use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use log::{error, info};
use prometheus::{BasicAuthentication, labels};
use rand::distr::{Alphanumeric, SampleString};
use tokio::net::TcpListener;
use tokio::task::spawn_blocking;
use tokio::time::{Duration, sleep};

use crate::cli::{DEFAULT_KEY_PATTERN, SubCommandExtend, feedback_sink};
use crate::config::{EnrollOptions, MatchOptions, PipelineOptions};
use crate::ledger::RosterLedger;
use crate::station::Station;
use crate::store::TemplateStore;
use crate::vein::Pipeline;
use crate::{Opts, server};

#[derive(Parser, Debug, Clone)]
pub struct ServerCommand {
    #[command(flatten)]
    pub pipeline: PipelineOptions,
    #[command(flatten)]
    pub matching: MatchOptions,
    #[command(flatten)]
    pub enroll: EnrollOptions,
    /// 监听地址
    #[arg(long, default_value = "127.0.0.1:8000")]
    pub addr: String,
    /// 请求验证 token，不填则随机生成
    #[arg(long, default_value_t = String::new())]
    pub token: String,
    /// 签到名册路径，默认为数据目录下的 roster.json
    #[arg(long, value_name = "FILE")]
    pub roster: Option<std::path::PathBuf>,
    /// 身份键的格式
    #[arg(long, default_value = DEFAULT_KEY_PATTERN)]
    pub key_pattern: String,
    /// 状态输出路径，例如串口设备；不填则写日志
    #[arg(long, value_name = "PATH")]
    pub feedback: Option<std::path::PathBuf>,
    /// prometheus 主动推送地址
    #[arg(long, value_name = "URL")]
    pub prometheus_push: Option<String>,
    /// 自定义 instance 标签值
    #[arg(long, value_name = "NAME")]
    pub prometheus_instance: Option<String>,
    /// prometheus 认证信息，格式为 username:password
    #[arg(long, value_name = "AUTH")]
    pub prometheus_auth: Option<String>,
}

impl SubCommandExtend for ServerCommand {
    async fn run(&self, opts: &Opts) -> anyhow::Result<()> {
        let pipeline = Pipeline::new(self.pipeline.clone());
        let store = Arc::new(TemplateStore::open(&opts.conf_dir, pipeline.dim())?);
        info!("已加载 {} 个身份", store.snapshot().len());
        let station = Station::new(pipeline, store, self.matching.clone())
            .with_feedback(feedback_sink(self.feedback.as_deref())?);

        let roster = self.roster.clone().unwrap_or_else(|| opts.conf_dir.roster());
        let ledger = RosterLedger::open(&roster)?;

        let token = if self.token.is_empty() {
            let token = Alphanumeric.sample_string(&mut rand::rng(), 32);
            info!("鉴权 token: {}", token);
            token
        } else {
            self.token.clone()
        };

        let auth = match &self.prometheus_auth {
            Some(s) => {
                let (username, password) = s
                    .split_once(':')
                    .context("prometheus 认证信息格式应为 username:password")?;
                Some((username.to_string(), password.to_string()))
            }
            None => None,
        };

        station.ready();
        let state = server::AppState::new(
            station,
            ledger,
            self.enroll.clone(),
            self.key_pattern.clone(),
            token,
        );
        let app = server::create_app(state);

        if let Some(url) = self.prometheus_push.clone() {
            let instance = self.prometheus_instance.clone().unwrap_or_else(|| self.addr.clone());
            tokio::spawn(async move {
                loop {
                    let metric_families = prometheus::gather();
                    let url = url.clone();
                    let instance = instance.clone();
                    let auth = auth.clone();
                    let r = spawn_blocking(move || {
                        prometheus::push_metrics(
                            "palmvein",
                            labels! {
                                "instance".to_string() => instance,
                            },
                            &url,
                            metric_families,
                            auth.map(|(username, password)| BasicAuthentication {
                                username,
                                password,
                            }),
                        )
                    })
                    .await;
                    match r {
                        Ok(Err(e)) => error!("推送指标失败: {e}"),
                        Err(e) => error!("推送任务异常: {e}"),
                        Ok(Ok(())) => {}
                    }
                    sleep(Duration::from_secs(30)).await;
                }
            });
        }

        info!("服务器启动：http://{}", &self.addr);
        let listener = TcpListener::bind(&self.addr).await?;
        axum::serve(listener, app).await?;

        Ok(())
    }
}
