use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::error::{PalmError, Result};

/// 签到结果
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Attendance {
    /// 首次签到，返回分配的座位
    Seated { table: String },
    AlreadyMarked,
    /// 该场次没有此人的记录
    NotFound,
}

/// 离场状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Presence {
    Out,
    Returned,
}

/// 签到记录的标识：`<场次>_<身份>`
pub fn attendance_id(session: &str, key: &str) -> String {
    format!("{}_{}", session, key)
}

/// 远端签到记录的读改写接口
///
/// 每次状态变更都可以用 [`undo`](Ledger::undo) 撤销，但只保留最近一次。
pub trait Ledger: Send + Sync {
    fn mark_present(&self, key: &str, session: &str) -> Result<Attendance>;

    fn toggle_away(&self, attendance_id: &str) -> Result<Presence>;

    /// 撤销最近一次状态变更，没有可撤销的变更时返回 `false`
    fn undo(&self) -> Result<bool>;
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
enum SeatStatus {
    Pending,
    Present,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
struct Seat {
    table: String,
    status: SeatStatus,
}

#[derive(Serialize, Deserialize, Debug, Default, Clone)]
struct Roster {
    #[serde(default)]
    attendance: BTreeMap<String, Seat>,
    #[serde(default)]
    away: BTreeMap<String, Presence>,
}

#[derive(Debug)]
enum Transition {
    Marked(String),
    Away { id: String, previous: Option<Presence> },
}

#[derive(Debug, Default)]
struct RosterState {
    roster: Roster,
    last: Option<Transition>,
}

/// 保存在本地 JSON 文件中的签到名册
///
/// ```json
/// {
///   "attendance": { "CSC101_A123456789": { "table": "12", "status": "Pending" } },
///   "away": { "CSC101_A123456789": "Out" }
/// }
/// ```
pub struct RosterLedger {
    path: PathBuf,
    state: Mutex<RosterState>,
}

impl RosterLedger {
    /// 读取名册，文件不存在时为空
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let roster = if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            serde_json::from_reader(reader)
                .map_err(|e| PalmError::StoreIo(e.to_string()))?
        } else {
            Roster::default()
        };
        debug!("名册 {} 共 {} 条签到记录", path.display(), roster.attendance.len());
        Ok(Self { path, state: Mutex::new(RosterState { roster, last: None }) })
    }

    /// 为某场次登记座位，状态为待签到
    pub fn assign(&self, session: &str, key: &str, table: &str) -> Result<()> {
        let mut state = self.lock();
        let mut roster = state.roster.clone();
        let seat = Seat { table: table.to_string(), status: SeatStatus::Pending };
        roster.attendance.insert(attendance_id(session, key), seat);
        self.save(&roster)?;
        state.roster = roster;
        Ok(())
    }

    /// 当前离场状态
    pub fn presence(&self, attendance_id: &str) -> Option<Presence> {
        self.lock().roster.away.get(attendance_id).copied()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, RosterState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 先写临时文件再重命名
    fn save(&self, roster: &Roster) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(writer, roster)
            .map_err(|e| PalmError::StoreIo(e.to_string()))?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

/// 变更在副本上进行，写盘成功后才替换内存中的名册
impl Ledger for RosterLedger {
    fn mark_present(&self, key: &str, session: &str) -> Result<Attendance> {
        let id = attendance_id(session, key);
        let mut state = self.lock();
        let mut roster = state.roster.clone();
        let result = match roster.attendance.get_mut(&id) {
            None => return Ok(Attendance::NotFound),
            Some(seat) if seat.status == SeatStatus::Present => {
                return Ok(Attendance::AlreadyMarked);
            }
            Some(seat) => {
                seat.status = SeatStatus::Present;
                Attendance::Seated { table: seat.table.clone() }
            }
        };
        self.save(&roster)?;
        info!("{} 签到成功", id);
        state.roster = roster;
        state.last = Some(Transition::Marked(id));
        Ok(result)
    }

    fn toggle_away(&self, attendance_id: &str) -> Result<Presence> {
        let mut state = self.lock();
        let mut roster = state.roster.clone();
        let previous = roster.away.get(attendance_id).copied();
        let next = match previous {
            Some(Presence::Out) => Presence::Returned,
            _ => Presence::Out,
        };
        roster.away.insert(attendance_id.to_string(), next);
        self.save(&roster)?;
        info!("{}: {:?}", attendance_id, next);
        state.roster = roster;
        state.last = Some(Transition::Away { id: attendance_id.to_string(), previous });
        Ok(next)
    }

    fn undo(&self) -> Result<bool> {
        let mut state = self.lock();
        let Some(last) = state.last.as_ref() else {
            return Ok(false);
        };
        let mut roster = state.roster.clone();
        match last {
            Transition::Marked(id) => {
                if let Some(seat) = roster.attendance.get_mut(id) {
                    seat.status = SeatStatus::Pending;
                }
            }
            Transition::Away { id, previous: Some(p) } => {
                roster.away.insert(id.clone(), *p);
            }
            Transition::Away { id, previous: None } => {
                roster.away.remove(id);
            }
        }
        self.save(&roster)?;
        info!("已撤销: {:?}", last);
        state.roster = roster;
        state.last = None;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ledger() -> (tempfile::TempDir, RosterLedger) {
        let dir = tempfile::tempdir().unwrap();
        let ledger = RosterLedger::open(dir.path().join("roster.json")).unwrap();
        (dir, ledger)
    }

    #[test]
    fn test_mark_present_transitions() {
        let (_dir, ledger) = ledger();
        ledger.assign("CSC101", "A123456789", "12").unwrap();

        assert_eq!(
            ledger.mark_present("A123456789", "CSC101").unwrap(),
            Attendance::Seated { table: "12".into() }
        );
        assert_eq!(ledger.mark_present("A123456789", "CSC101").unwrap(), Attendance::AlreadyMarked);
        assert_eq!(ledger.mark_present("B000000000", "CSC101").unwrap(), Attendance::NotFound);
    }

    #[test]
    fn test_toggle_away() {
        let (_dir, ledger) = ledger();
        let id = attendance_id("CSC101", "A123456789");
        assert_eq!(ledger.toggle_away(&id).unwrap(), Presence::Out);
        assert_eq!(ledger.toggle_away(&id).unwrap(), Presence::Returned);
        assert_eq!(ledger.toggle_away(&id).unwrap(), Presence::Out);
    }

    #[test]
    fn test_undo_single_level() {
        let (_dir, ledger) = ledger();
        ledger.assign("CSC101", "A123456789", "7").unwrap();
        ledger.mark_present("A123456789", "CSC101").unwrap();

        assert!(ledger.undo().unwrap());
        // 只能撤销一次
        assert!(!ledger.undo().unwrap());
        assert_eq!(
            ledger.mark_present("A123456789", "CSC101").unwrap(),
            Attendance::Seated { table: "7".into() }
        );

        let id = attendance_id("CSC101", "A123456789");
        ledger.toggle_away(&id).unwrap();
        ledger.undo().unwrap();
        assert_eq!(ledger.presence(&id), None);
    }

    #[test]
    fn test_failed_save_keeps_memory_in_sync() {
        let (dir, ledger) = ledger();
        ledger.assign("CSC101", "A123456789", "5").unwrap();
        let id = attendance_id("CSC101", "A123456789");

        // 临时文件路径被目录占用，写盘必然失败
        let blocker = dir.path().join("roster.json.tmp");
        fs::create_dir(&blocker).unwrap();
        assert!(matches!(ledger.mark_present("A123456789", "CSC101"), Err(PalmError::StoreIo(_))));
        assert!(ledger.toggle_away(&id).is_err());
        assert!(!ledger.undo().unwrap());
        assert_eq!(ledger.presence(&id), None);

        fs::remove_dir(&blocker).unwrap();
        assert_eq!(
            ledger.mark_present("A123456789", "CSC101").unwrap(),
            Attendance::Seated { table: "5".into() }
        );
        let saved = fs::read_to_string(dir.path().join("roster.json")).unwrap();
        assert!(saved.contains("Present"));
        assert!(ledger.undo().unwrap());
    }

    #[test]
    fn test_roster_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roster.json");
        {
            let ledger = RosterLedger::open(&path).unwrap();
            ledger.assign("CSC101", "A123456789", "3").unwrap();
            ledger.mark_present("A123456789", "CSC101").unwrap();
        }
        let ledger = RosterLedger::open(&path).unwrap();
        assert_eq!(ledger.mark_present("A123456789", "CSC101").unwrap(), Attendance::AlreadyMarked);
    }
}
