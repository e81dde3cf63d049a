use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::engine::{ETag, Properties, TableEngine};
use super::entities::{from_row, to_properties, EmailIndexEntry, Session, SessionEvent, User, UserEvent};
use super::user_id::build_user_id;
use super::{
    normalize_email, StoreError, StoreResult, ALL_TABLES, EMAIL_INDEX_TABLE, EMAIL_PARTITION, EVENTS_BY_SESSION_TABLE,
    EVENTS_BY_USER_TABLE, SESSIONS_TABLE, SESSION_PARTITION, USERS_TABLE, USER_PARTITION,
};

/// Source of "now" for every timestamp the store writes.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Users, the email index, sessions and the journey log over a `TableEngine`.
///
/// Every write is a single-row, single-attempt operation. Lookups report absence as `Ok(None)`;
/// `Err` is reserved for engine faults (missing table, I/O).
#[derive(Clone)]
pub struct IdentityStore {
    engine: Arc<dyn TableEngine>,
    clock: Clock,
}

fn put<V: serde::Serialize>(props: &mut Properties, key: &str, v: V) -> StoreResult<()> {
    props.insert(key.to_string(), serde_json::to_value(v)?);
    Ok(())
}

fn require(value: &str, what: &str) -> StoreResult<()> {
    if value.trim().is_empty() { Err(StoreError::InvalidArgument(format!("{} is required", what))) } else { Ok(()) }
}

impl IdentityStore {
    pub fn new(engine: Arc<dyn TableEngine>) -> Self {
        Self { engine, clock: Arc::new(Utc::now) }
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    fn now(&self) -> DateTime<Utc> { (self.clock)() }

    /// Create every table that does not exist yet. Safe to call repeatedly and concurrently.
    pub fn ensure_schema(&self) -> StoreResult<()> {
        for t in ALL_TABLES.iter() {
            if self.engine.create_table_if_absent(t)? {
                info!(target: "store", table = %t, "table created");
            }
        }
        Ok(())
    }

    pub fn find_user_by_id(&self, user_id: &str) -> StoreResult<Option<User>> {
        let key = user_id.trim();
        if key.is_empty() { return Ok(None); }
        let Some(row) = self.engine.get_if_exists(USERS_TABLE, USER_PARTITION, key)? else { return Ok(None); };
        match from_row::<User>(&row) {
            Ok(mut u) => {
                u.id = key.to_string();
                u.etag = Some(row.etag);
                Ok(Some(u))
            }
            Err(e) => {
                warn!(target: "store", user_id = %key, "unreadable user row treated as missing: {}", e);
                Ok(None)
            }
        }
    }

    /// Lookup through the email index. A dangling or unreadable index entry is "not found".
    pub fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        let key = normalize_email(email);
        if key.is_empty() { return Ok(None); }
        let Some(row) = self.engine.get_if_exists(EMAIL_INDEX_TABLE, EMAIL_PARTITION, &key)? else { return Ok(None); };
        let idx: EmailIndexEntry = match from_row(&row) {
            Ok(i) => i,
            Err(e) => {
                warn!(target: "store", "unreadable email index row treated as missing: {}", e);
                return Ok(None);
            }
        };
        let user = self.find_user_by_id(&idx.user_id)?;
        if user.is_none() {
            debug!(target: "store", user_id = %idx.user_id, "email index points at a missing user");
        }
        Ok(user)
    }

    /// Write the user row, then the email index row. The two writes are not atomic: when the index
    /// insert loses a race the user row stays behind unreachable and the call fails with `AlreadyExists`.
    pub fn create_user(&self, email: &str, full_name: &str, password_hash: &str) -> StoreResult<User> {
        let key = normalize_email(email);
        require(&key, "email")?;
        require(password_hash, "password hash")?;
        let now = self.now();
        let id = build_user_id(Some(full_name));
        let mut user = User {
            id: id.clone(),
            email: key.clone(),
            full_name: full_name.trim().to_string(),
            password_hash: password_hash.to_string(),
            created_at: now,
            updated_at: None,
            etag: None,
        };
        let etag = self.engine.insert(USERS_TABLE, USER_PARTITION, &id, to_properties(&user)?)?;
        user.etag = Some(etag);

        let idx = EmailIndexEntry { email_key: key.clone(), user_id: id.clone(), email: email.trim().to_string(), created_at: now };
        if let Err(e) = self.engine.insert(EMAIL_INDEX_TABLE, EMAIL_PARTITION, &key, to_properties(&idx)?) {
            warn!(target: "store", user_id = %id, "email index write failed, user row left orphaned: {}", e);
            return Err(e);
        }
        info!(target: "store", user_id = %id, "user created");
        Ok(user)
    }

    /// Upsert: refresh `lastSeenAt` and clear `endedAt` on an existing session, otherwise create it.
    /// Concurrent touches of one sid are last-writer-wins: a touch that loses the race returns the
    /// row the winner wrote.
    pub fn touch_session(&self, sid: &str) -> StoreResult<Session> {
        require(sid, "sid")?;
        match self.try_touch_session(sid) {
            Err(StoreError::Conflict { .. }) | Err(StoreError::AlreadyExists { .. }) => {
                debug!(target: "store", "session touch lost a race, keeping the concurrent write");
                self.find_session(sid)?.ok_or_else(|| StoreError::not_found(SESSIONS_TABLE, SESSION_PARTITION, sid))
            }
            other => other,
        }
    }

    fn try_touch_session(&self, sid: &str) -> StoreResult<Session> {
        let now = self.now();
        if let Some(row) = self.engine.get_if_exists(SESSIONS_TABLE, SESSION_PARTITION, sid)? {
            let mut props = Properties::new();
            put(&mut props, "lastSeenAt", now)?;
            props.insert("endedAt".into(), Value::Null);
            let etag = self.engine.merge_update(SESSIONS_TABLE, SESSION_PARTITION, sid, props, &row.etag)?;
            let mut s: Session = from_row(&row)?;
            s.sid = sid.to_string();
            s.last_seen_at = now;
            s.ended_at = None;
            s.etag = Some(etag);
            return Ok(s);
        }
        let mut s = Session {
            sid: sid.to_string(),
            user_id: None,
            created_at: now,
            last_seen_at: now,
            ended_at: None,
            ip_hash: None,
            ua_hash: None,
            etag: None,
        };
        let etag = self.engine.insert(SESSIONS_TABLE, SESSION_PARTITION, sid, to_properties(&s)?)?;
        debug!(target: "store", "session created");
        s.etag = Some(etag);
        Ok(s)
    }

    /// Attach a user to an existing session. A missing session is `NotFound`, never an implicit create.
    pub fn bind_session(&self, sid: &str, user_id: &str) -> StoreResult<Session> {
        require(sid, "sid")?;
        require(user_id, "user id")?;
        let row = self.engine.get(SESSIONS_TABLE, SESSION_PARTITION, sid)?;
        let mut s: Session = from_row(&row)?;
        if let Some(prev) = s.user_id.as_deref().filter(|p| *p != user_id) {
            warn!(target: "store", previous = %prev, user_id = %user_id, "session rebound to a different user");
        }
        let now = self.now();
        let mut props = Properties::new();
        put(&mut props, "userId", user_id)?;
        put(&mut props, "lastSeenAt", now)?;
        let etag = self.engine.merge_update(SESSIONS_TABLE, SESSION_PARTITION, sid, props, &row.etag)?;
        s.sid = sid.to_string();
        s.user_id = Some(user_id.to_string());
        s.last_seen_at = now;
        s.etag = Some(etag);
        Ok(s)
    }

    /// Mark a session ended (row is kept). Returns false when there was nothing to end.
    pub fn end_session(&self, sid: &str) -> StoreResult<bool> {
        if sid.trim().is_empty() { return Ok(false); }
        let Some(row) = self.engine.get_if_exists(SESSIONS_TABLE, SESSION_PARTITION, sid)? else { return Ok(false); };
        let now = self.now();
        let mut props = Properties::new();
        put(&mut props, "lastSeenAt", now)?;
        put(&mut props, "endedAt", now)?;
        self.engine.merge_update(SESSIONS_TABLE, SESSION_PARTITION, sid, props, &row.etag)?;
        Ok(true)
    }

    pub fn find_session(&self, sid: &str) -> StoreResult<Option<Session>> {
        if sid.trim().is_empty() { return Ok(None); }
        let Some(row) = self.engine.get_if_exists(SESSIONS_TABLE, SESSION_PARTITION, sid)? else { return Ok(None); };
        let mut s: Session = from_row(&row)?;
        s.sid = sid.to_string();
        s.etag = Some(row.etag);
        Ok(Some(s))
    }

    /// Replace the password digest. With `expected`, the write only lands if the row still carries
    /// that etag (the one from the read the caller based its decision on); otherwise `Conflict`.
    pub fn update_user_password(&self, user_id: &str, password_hash: &str, expected: Option<&ETag>) -> StoreResult<User> {
        require(user_id, "user id")?;
        require(password_hash, "password hash")?;
        let key = user_id.trim();
        let row = self.engine.get(USERS_TABLE, USER_PARTITION, key)?;
        let mut user: User = from_row(&row)?;
        let now = self.now();
        let mut props = Properties::new();
        put(&mut props, "passwordHash", password_hash)?;
        put(&mut props, "updatedAt", now)?;
        let etag = self.engine.merge_update(USERS_TABLE, USER_PARTITION, key, props, expected.unwrap_or(&row.etag))?;
        user.id = key.to_string();
        user.password_hash = password_hash.to_string();
        user.updated_at = Some(now);
        user.etag = Some(etag);
        Ok(user)
    }

    /// Append one journey event to `EventsBySession` (when a sid is known) and `EventsByUser`
    /// (when a user is known). Returns the row key shared by both projections.
    pub fn append_event(&self, sid: Option<&str>, user_id: Option<&str>, event_type: &str, payload: &Value) -> StoreResult<String> {
        let now = self.now();
        let row_key = format!("{:015}_{}", now.timestamp_millis().max(0), uuid::Uuid::new_v4().simple());
        let data_json = serde_json::to_string(payload)?;
        let sid = sid.map(str::trim).filter(|s| !s.is_empty());
        let user_id = user_id.map(str::trim).filter(|u| !u.is_empty());
        if let Some(sid) = sid {
            let ev = SessionEvent {
                sid: sid.to_string(),
                row_key: row_key.clone(),
                user_id: user_id.map(str::to_string),
                event_type: event_type.to_string(),
                data_json: data_json.clone(),
                created_at: now,
            };
            self.engine.insert(EVENTS_BY_SESSION_TABLE, sid, &row_key, to_properties(&ev)?)?;
        }
        if let Some(uid) = user_id {
            let ev = UserEvent {
                user_id: uid.to_string(),
                row_key: row_key.clone(),
                session_id: sid.map(str::to_string),
                event_type: event_type.to_string(),
                data_json,
                created_at: now,
            };
            self.engine.insert(EVENTS_BY_USER_TABLE, uid, &row_key, to_properties(&ev)?)?;
        }
        Ok(row_key)
    }

    /// Journey of one session in chronological order.
    pub fn session_events(&self, sid: &str) -> StoreResult<Vec<SessionEvent>> {
        self.engine.list_partition(EVENTS_BY_SESSION_TABLE, sid)?.into_iter().map(|(rk, row)| {
            let mut ev: SessionEvent = from_row(&row)?;
            ev.sid = sid.to_string();
            ev.row_key = rk;
            Ok(ev)
        }).collect()
    }

    pub fn user_events(&self, user_id: &str) -> StoreResult<Vec<UserEvent>> {
        self.engine.list_partition(EVENTS_BY_USER_TABLE, user_id)?.into_iter().map(|(rk, row)| {
            let mut ev: UserEvent = from_row(&row)?;
            ev.user_id = user_id.to_string();
            ev.row_key = rk;
            Ok(ev)
        }).collect()
    }
}

#[cfg(test)]
#[path = "identity_store_tests.rs"]
mod tests;
