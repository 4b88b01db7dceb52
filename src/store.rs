use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::ValueEnum;
use heed::types::{SerdeBincode, Str};
use heed::{Database, Env, EnvOpenOptions, WithTls};
use log::{debug, info, warn};
use ndarray::Array1;
use ndarray_npy::{read_npy, write_npy};
use opencv::core::Mat;
use serde::{Deserialize, Serialize};

use crate::config::{ConfDir, MatchOptions};
use crate::error::{PalmError, Result};
use crate::matcher::{Gallery, GalleryEntry, MatchDecision};
use crate::utils;
use crate::vector::FeatureVector;

const META_KEY: &str = "meta";

/// 手掌侧别
#[derive(ValueEnum, Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandSide {
    Left,
    Right,
}

impl HandSide {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Left => "Left",
            Self::Right => "Right",
        }
    }
}

/// 身份的展示信息
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct IdentityProfile {
    pub key: String,
    pub name: String,
    pub faculty: Option<String>,
    pub program: Option<String>,
}

impl IdentityProfile {
    pub fn new(key: impl Into<String>, name: impl Into<String>) -> Self {
        Self { key: key.into(), name: name.into(), ..Default::default() }
    }
}

/// 模板文件的引用，路径相对于模板根目录
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct TemplateRef {
    pub side: HandSide,
    pub vector: String,
    pub image: Option<String>,
}

/// 索引中的一条身份记录
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct IdentityRecord {
    pub profile: IdentityProfile,
    pub created_at: u64,
    pub templates: Vec<TemplateRef>,
}

/// 从磁盘读出的模板
#[derive(Debug, Clone)]
pub struct Template {
    pub key: String,
    pub side: HandSide,
    pub vector: FeatureVector,
    pub image: Option<PathBuf>,
}

/// 待写入的一个样本
#[derive(Debug)]
pub struct Sample {
    pub side: HandSide,
    pub vector: FeatureVector,
    pub image: Option<Mat>,
}

#[derive(Serialize, Deserialize)]
struct Meta {
    dim: usize,
}

/// 模板库
///
/// 身份索引保存在 LMDB 中，向量保存为 `.npy`，原图保存为 PNG。
/// 匹配读取内存中的 [`Gallery`] 快照；所有写操作在同一把锁内完成索引事务，
/// 提交成功后再替换快照，读方不会看到写了一半的身份。
pub struct TemplateStore {
    conf: ConfDir,
    env: Env<WithTls>,
    db_identity: Database<Str, SerdeBincode<IdentityRecord>>,
    dim: usize,
    gallery: RwLock<Arc<Gallery>>,
    write_lock: Mutex<()>,
    /// 模板文件名的序号，保证同一向量多次写入时文件名不同
    seq: AtomicU64,
}

impl TemplateStore {
    /// 打开或创建模板库，已有库的维度必须与 `dim` 一致
    pub fn open(conf: &ConfDir, dim: usize) -> Result<Self> {
        Self::open_with(conf, Some(dim))
    }

    /// 以库中记录的维度打开，用于不需要提取特征的管理操作
    pub fn open_existing(conf: &ConfDir) -> Result<Self> {
        Self::open_with(conf, None)
    }

    fn open_with(conf: &ConfDir, expected: Option<usize>) -> Result<Self> {
        let index = conf.index();
        info!("打开模板库: {}", conf.path().display());
        fs::create_dir_all(&index)?;
        fs::create_dir_all(conf.templates())?;

        let env = unsafe {
            EnvOpenOptions::new()
                .map_size(1 << 30) // 1GiB
                .max_dbs(2)
                .open(&index)?
        };
        let mut txn = env.write_txn()?;
        let db_identity =
            env.create_database::<Str, SerdeBincode<IdentityRecord>>(&mut txn, Some("identity"))?;
        let db_meta = env.create_database::<Str, SerdeBincode<Meta>>(&mut txn, Some("meta"))?;
        let dim = match (db_meta.get(&txn, META_KEY)?, expected) {
            (Some(meta), Some(dim)) if meta.dim != dim => {
                return Err(PalmError::DimensionMismatch { expected: meta.dim, actual: dim });
            }
            (Some(meta), _) => meta.dim,
            (None, Some(dim)) => {
                db_meta.put(&mut txn, META_KEY, &Meta { dim })?;
                dim
            }
            // 空库，写入时会因维度不符而失败
            (None, None) => 0,
        };
        txn.commit()?;

        let store = Self {
            conf: conf.clone(),
            env,
            db_identity,
            dim,
            gallery: RwLock::new(Arc::new(Gallery::default())),
            write_lock: Mutex::new(()),
            seq: AtomicU64::new(0),
        };
        let gallery = store.load_gallery()?;
        info!("已加载 {} 个身份", gallery.len());
        *store.gallery.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(gallery);
        Ok(store)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn conf_dir(&self) -> &ConfDir {
        &self.conf
    }

    /// 当前的匹配快照
    pub fn snapshot(&self) -> Arc<Gallery> {
        self.gallery.read().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// 在当前快照上匹配
    pub fn match_query(&self, query: &FeatureVector, opts: &MatchOptions) -> Result<MatchDecision> {
        self.check_dim(query)?;
        Ok(self.snapshot().match_query(query, opts))
    }

    pub fn identity_exists(&self, key: &str) -> Result<bool> {
        let txn = self.env.read_txn()?;
        Ok(self.db_identity.get(&txn, key)?.is_some())
    }

    pub fn get_identity(&self, key: &str) -> Result<Option<IdentityRecord>> {
        let txn = self.env.read_txn()?;
        Ok(self.db_identity.get(&txn, key)?)
    }

    /// 按键排序的全部身份记录
    pub fn identities(&self) -> Result<Vec<IdentityRecord>> {
        let txn = self.env.read_txn()?;
        let mut records = vec![];
        for item in self.db_identity.iter(&txn)? {
            let (_, record) = item?;
            records.push(record);
        }
        Ok(records)
    }

    /// 读取某个身份或全部身份的模板
    pub fn list_templates(&self, key: Option<&str>) -> Result<Vec<Template>> {
        let records = match key {
            Some(key) => self.get_identity(key)?.into_iter().collect(),
            None => self.identities()?,
        };
        let mut templates = vec![];
        for record in records {
            for t in &record.templates {
                templates.push(self.read_template(&record.profile.key, t)?);
            }
        }
        Ok(templates)
    }

    /// 新建身份并写入全部样本
    ///
    /// 先写模板文件再提交索引事务，事务失败时删除本次写入的文件。
    pub fn create_identity(
        &self,
        profile: IdentityProfile,
        samples: Vec<Sample>,
    ) -> Result<IdentityRecord> {
        let _guard = self.lock();
        if self.identity_exists(&profile.key)? {
            return Err(PalmError::DuplicateIdentity(profile.key));
        }
        for sample in &samples {
            self.check_dim(&sample.vector)?;
        }

        let mut written = vec![];
        let result = self.write_samples(&profile.key, &samples, &mut written).and_then(|templates| {
            let record =
                IdentityRecord { profile: profile.clone(), created_at: unix_now(), templates };
            let mut txn = self.env.write_txn()?;
            self.db_identity.put(&mut txn, &profile.key, &record)?;
            txn.commit()?;
            Ok(record)
        });

        match result {
            Ok(record) => {
                let vectors = samples.into_iter().map(|s| s.vector).collect();
                let entry = GalleryEntry { key: profile.key.clone(), templates: vectors };
                self.publish(|g| g.with_entry(entry));
                info!("已登记身份 {}（{} 个模板）", profile.key, record.templates.len());
                Ok(record)
            }
            Err(e) => {
                remove_files(&written);
                Err(e)
            }
        }
    }

    /// 为已有身份追加一个模板
    pub fn put_template(
        &self,
        key: &str,
        side: HandSide,
        vector: FeatureVector,
        image: Option<&Mat>,
    ) -> Result<TemplateRef> {
        let _guard = self.lock();
        self.check_dim(&vector)?;
        let mut record = self
            .get_identity(key)?
            .ok_or_else(|| PalmError::IdentityNotFound(key.to_string()))?;

        let mut written = vec![];
        let result =
            self.write_template(key, side, &vector, image, &mut written).and_then(|template| {
                record.templates.push(template.clone());
                let mut txn = self.env.write_txn()?;
                self.db_identity.put(&mut txn, key, &record)?;
                txn.commit()?;
                Ok(template)
            });

        match result {
            Ok(template) => {
                let mut vectors =
                    self.snapshot().get(key).map(|e| e.templates.clone()).unwrap_or_default();
                vectors.push(vector);
                let entry = GalleryEntry { key: key.to_string(), templates: vectors };
                self.publish(|g| g.with_entry(entry));
                Ok(template)
            }
            Err(e) => {
                remove_files(&written);
                Err(e)
            }
        }
    }

    /// 删除身份及其全部模板
    ///
    /// 索引事务提交后立即替换快照，之后才删除磁盘上的文件。
    pub fn delete_identity(&self, key: &str) -> Result<()> {
        let _guard = self.lock();
        let mut txn = self.env.write_txn()?;
        if !self.db_identity.delete(&mut txn, key)? {
            return Err(PalmError::IdentityNotFound(key.to_string()));
        }
        txn.commit()?;
        self.publish(|g| g.without(key));

        let dir = self.conf.identity_dir(key);
        if dir.exists()
            && let Err(e) = fs::remove_dir_all(&dir)
        {
            warn!("删除模板目录 {} 失败: {}", dir.display(), e);
        }
        info!("已删除身份 {}", key);
        Ok(())
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn publish<F: FnOnce(&Gallery) -> Gallery>(&self, update: F) {
        let mut gallery = self.gallery.write().unwrap_or_else(PoisonError::into_inner);
        *gallery = Arc::new(update(&gallery));
    }

    fn check_dim(&self, vector: &FeatureVector) -> Result<()> {
        if vector.dim() != self.dim {
            return Err(PalmError::DimensionMismatch { expected: self.dim, actual: vector.dim() });
        }
        Ok(())
    }

    fn write_samples(
        &self,
        key: &str,
        samples: &[Sample],
        written: &mut Vec<PathBuf>,
    ) -> Result<Vec<TemplateRef>> {
        samples
            .iter()
            .map(|s| self.write_template(key, s.side, &s.vector, s.image.as_ref(), written))
            .collect()
    }

    fn write_template(
        &self,
        key: &str,
        side: HandSide,
        vector: &FeatureVector,
        image: Option<&Mat>,
        written: &mut Vec<PathBuf>,
    ) -> Result<TemplateRef> {
        let dir = self.conf.side_dir(key, side);
        fs::create_dir_all(&dir)?;

        let stem = self.unique_stem(key, side, vector, &dir);
        let relative = |name: &str| format!("{}/{}/{}", key, side.as_str(), name);

        let vector_name = format!("vec_{}.npy", stem);
        let vector_path = dir.join(&vector_name);
        write_npy(&vector_path, &Array1::from(vector.as_slice().to_vec()))?;
        written.push(vector_path);

        let image_name = match image {
            Some(image) => {
                let name = format!("img_{}.png", stem);
                let path = dir.join(&name);
                utils::imwrite(&path, image)?;
                written.push(path);
                Some(relative(&name))
            }
            None => None,
        };
        debug!("写入模板 {}/{}/{}", key, side.as_str(), vector_name);

        Ok(TemplateRef { side, vector: relative(&vector_name), image: image_name })
    }

    /// 由身份、侧别、写入序号与向量内容共同决定的文件名，已存在时换下一个序号
    fn unique_stem(&self, key: &str, side: HandSide, vector: &FeatureVector, dir: &Path) -> String {
        loop {
            let seq = self.seq.fetch_add(1, Ordering::Relaxed);
            let mut hasher = blake3::Hasher::new();
            hasher.update(key.as_bytes());
            hasher.update(side.as_str().as_bytes());
            hasher.update(&unix_nanos().to_le_bytes());
            hasher.update(&seq.to_le_bytes());
            hasher.update(bytemuck::cast_slice(vector.as_slice()));
            let stem = hasher.finalize().to_hex().as_str()[..16].to_string();
            if !dir.join(format!("vec_{}.npy", stem)).exists() {
                return stem;
            }
        }
    }

    fn read_template(&self, key: &str, template: &TemplateRef) -> Result<Template> {
        let root = self.conf.templates();
        let array: Array1<f32> = read_npy(root.join(&template.vector))?;
        let vector = FeatureVector::new(array.to_vec());
        self.check_dim(&vector)?;
        Ok(Template {
            key: key.to_string(),
            side: template.side,
            vector,
            image: template.image.as_ref().map(|p| root.join(p)),
        })
    }

    fn load_gallery(&self) -> Result<Gallery> {
        let mut entries = vec![];
        for record in self.identities()? {
            let key = record.profile.key.clone();
            let templates = record
                .templates
                .iter()
                .map(|t| self.read_template(&key, t).map(|t| t.vector))
                .collect::<Result<Vec<_>>>()?;
            entries.push(GalleryEntry { key, templates });
        }
        Ok(Gallery::new(entries))
    }
}

fn remove_files(paths: &[PathBuf]) {
    for path in paths {
        if let Err(e) = fs::remove_file(path) {
            warn!("清理文件 {} 失败: {}", path.display(), e);
        }
    }
}

fn unix_nanos() -> u128 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_nanos()).unwrap_or_default()
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or_default()
}
