//! Session admission gate: users, IP policy, and per-session limits.
//!
//! The engine itself never authenticates anything; this layer sits in front
//! of it and yields a `(session_id, owner_id)` pair for every admitted
//! message. Passwords are stored as salted SHA-256 digests. An IP may hold at
//! most five sessions and is blacklisted for an hour after ten failed logins.
//! Sessions time out on heartbeat (30 s regular, 60 s market maker) and carry
//! a one-second message-rate window (100/s regular, 200/s market maker).

use crate::types::{OwnerId, SessionId};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::Instant;
use thiserror::Error;

const MAX_SESSIONS: usize = 1_000;
const MAX_SESSIONS_PER_IP: usize = 5;
const MAX_FAILED_ATTEMPTS: u32 = 10;
const BAN_DURATION_MS: i64 = 3_600_000;
const LOGIN_LOCKOUT_FAILURES: u32 = 5;
const LOGIN_LOCKOUT_MS: i64 = 300_000;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("username already exists")]
    DuplicateUser,
    #[error("unknown user")]
    UnknownUser,
    #[error("session table full")]
    CapacityExhausted,
    #[error("ip address refused")]
    IpRefused,
}

fn digest_password(password: &str, salt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(password.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Clone, Debug)]
struct UserRecord {
    owner_id: OwnerId,
    password_digest: String,
    salt: String,
    is_market_maker: bool,
    is_admin: bool,
    is_active: bool,
    failed_login_attempts: u32,
    last_failed_login_ms: i64,
}

/// Username → credentials and trader identity.
#[derive(Debug, Default)]
struct UserDirectory {
    users: HashMap<String, UserRecord>,
    next_owner_id: OwnerId,
}

impl UserDirectory {
    fn create_user(
        &mut self,
        username: &str,
        password: &str,
        is_market_maker: bool,
        is_admin: bool,
    ) -> Result<OwnerId, SessionError> {
        if self.users.contains_key(username) {
            return Err(SessionError::DuplicateUser);
        }
        self.next_owner_id += 1;
        let owner_id = self.next_owner_id;
        let salt = format!("{username}:{owner_id}");
        self.users.insert(
            username.to_string(),
            UserRecord {
                owner_id,
                password_digest: digest_password(password, &salt),
                salt,
                is_market_maker,
                is_admin,
                is_active: true,
                failed_login_attempts: 0,
                last_failed_login_ms: 0,
            },
        );
        Ok(owner_id)
    }

    /// Checks credentials at `now_ms`. Five straight failures lock the user
    /// out for five minutes.
    fn authenticate_at(&mut self, username: &str, password: &str, now_ms: i64) -> bool {
        let Some(user) = self.users.get_mut(username) else {
            return false;
        };
        if user.failed_login_attempts >= LOGIN_LOCKOUT_FAILURES
            && now_ms - user.last_failed_login_ms <= LOGIN_LOCKOUT_MS
        {
            return false;
        }
        if !user.is_active {
            return false;
        }
        if digest_password(password, &user.salt) != user.password_digest {
            user.failed_login_attempts += 1;
            user.last_failed_login_ms = now_ms;
            return false;
        }
        user.failed_login_attempts = 0;
        true
    }

    fn deactivate(&mut self, username: &str) {
        if let Some(user) = self.users.get_mut(username) {
            user.is_active = false;
        }
    }

    fn get(&self, username: &str) -> Option<&UserRecord> {
        self.users.get(username)
    }
}

/// Per-IP session caps, failure tracking, and temporary bans.
#[derive(Debug, Default)]
struct IpManager {
    sessions_by_ip: HashMap<String, Vec<SessionId>>,
    failed_attempts: HashMap<String, u32>,
    blacklist_until_ms: HashMap<String, i64>,
}

impl IpManager {
    fn is_ip_allowed(&mut self, ip: &str, now_ms: i64) -> bool {
        match self.blacklist_until_ms.get(ip) {
            Some(&until) if until > now_ms => false,
            Some(_) => {
                self.blacklist_until_ms.remove(ip);
                true
            }
            None => true,
        }
    }

    // Single home for the capacity rule; can_create_session and add_session
    // both route through it.
    fn has_capacity(&self, ip: &str) -> bool {
        self.sessions_by_ip
            .get(ip)
            .map_or(true, |sessions| sessions.len() < MAX_SESSIONS_PER_IP)
    }

    fn can_create_session(&self, ip: &str) -> bool {
        self.has_capacity(ip)
    }

    fn add_session(&mut self, ip: &str, session_id: SessionId) -> bool {
        if !self.has_capacity(ip) {
            return false;
        }
        self.sessions_by_ip
            .entry(ip.to_string())
            .or_default()
            .push(session_id);
        true
    }

    fn remove_session(&mut self, ip: &str, session_id: SessionId) {
        if let Some(sessions) = self.sessions_by_ip.get_mut(ip) {
            sessions.retain(|&s| s != session_id);
            if sessions.is_empty() {
                self.sessions_by_ip.remove(ip);
            }
        }
    }

    fn record_failed_attempt(&mut self, ip: &str, now_ms: i64) {
        let count = self.failed_attempts.entry(ip.to_string()).or_insert(0);
        *count += 1;
        if *count >= MAX_FAILED_ATTEMPTS {
            self.blacklist_until_ms
                .insert(ip.to_string(), now_ms + BAN_DURATION_MS);
        }
    }

    fn clear_failed_attempts(&mut self, ip: &str) {
        self.failed_attempts.remove(ip);
    }

    fn session_count(&self, ip: &str) -> usize {
        self.sessions_by_ip.get(ip).map_or(0, Vec::len)
    }
}

/// One client connection.
#[derive(Debug)]
struct Session {
    session_id: SessionId,
    username: String,
    client_ip: String,
    is_authenticated: bool,
    is_market_maker: bool,
    is_admin: bool,
    last_heartbeat_ms: i64,
    message_timestamps_ms: VecDeque<i64>,
    total_orders_placed: u64,
    total_cancellations: u64,
}

impl Session {
    fn new(session_id: SessionId, username: &str, client_ip: &str, now_ms: i64) -> Self {
        Self {
            session_id,
            username: username.to_string(),
            client_ip: client_ip.to_string(),
            is_authenticated: false,
            is_market_maker: false,
            is_admin: false,
            last_heartbeat_ms: now_ms,
            message_timestamps_ms: VecDeque::new(),
            total_orders_placed: 0,
            total_cancellations: 0,
        }
    }

    fn is_active_at(&self, now_ms: i64) -> bool {
        let timeout = if self.is_market_maker { 60_000 } else { 30_000 };
        now_ms - self.last_heartbeat_ms < timeout
    }

    /// Sliding one-second window; market makers get the higher budget.
    fn is_rate_limited_at(&mut self, now_ms: i64) -> bool {
        while self
            .message_timestamps_ms
            .front()
            .is_some_and(|&front| now_ms - front > 1_000)
        {
            self.message_timestamps_ms.pop_front();
        }
        let limit = if self.is_market_maker { 200 } else { 100 };
        if self.message_timestamps_ms.len() >= limit {
            return true;
        }
        self.message_timestamps_ms.push_back(now_ms);
        false
    }
}

/// Everything an admitted order needs from the gate.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdmissionTicket {
    pub session_id: SessionId,
    pub owner_id: OwnerId,
    pub is_market_maker: bool,
}

/// Per-session counters and flags.
#[derive(Clone, Copy, Debug, Default)]
pub struct SessionStats {
    pub orders_placed: u64,
    pub cancellations: u64,
    pub is_market_maker: bool,
    pub is_admin: bool,
}

#[derive(Debug, Default)]
struct SessionState {
    sessions: HashMap<SessionId, Session>,
    username_to_session: HashMap<String, SessionId>,
    next_session_id: SessionId,
    users: UserDirectory,
    ips: IpManager,
}

/// Admission gate over all client sessions. Internally serialised with a
/// single lock; the per-component helpers are plain structs used under it.
#[derive(Debug)]
pub struct SessionManager {
    state: Mutex<SessionState>,
    epoch: Instant,
}

impl SessionManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::default()),
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> i64 {
        self.epoch.elapsed().as_millis() as i64
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SessionState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn create_user(
        &self,
        username: &str,
        password: &str,
        is_market_maker: bool,
        is_admin: bool,
    ) -> Result<OwnerId, SessionError> {
        self.lock()
            .users
            .create_user(username, password, is_market_maker, is_admin)
    }

    pub fn deactivate_user(&self, username: &str) {
        self.lock().users.deactivate(username);
    }

    /// Opens a session for `username` from `client_ip`. An existing session
    /// for the same username is replaced.
    pub fn create_session(&self, username: &str, client_ip: &str) -> Result<SessionId, SessionError> {
        let now = self.now_ms();
        let mut state = self.lock();

        if state.users.get(username).is_none() {
            return Err(SessionError::UnknownUser);
        }
        if state.sessions.len() >= MAX_SESSIONS {
            return Err(SessionError::CapacityExhausted);
        }
        if !state.ips.is_ip_allowed(client_ip, now) || !state.ips.can_create_session(client_ip) {
            return Err(SessionError::IpRefused);
        }

        if let Some(old_id) = state.username_to_session.remove(username) {
            if let Some(old) = state.sessions.remove(&old_id) {
                state.ips.remove_session(&old.client_ip, old_id);
            }
        }

        state.next_session_id += 1;
        let session_id = state.next_session_id;
        state
            .sessions
            .insert(session_id, Session::new(session_id, username, client_ip, now));
        state
            .username_to_session
            .insert(username.to_string(), session_id);
        state.ips.add_session(client_ip, session_id);
        Ok(session_id)
    }

    /// Authenticates an open session against the user directory. Failures
    /// count against both the user and the originating IP.
    pub fn authenticate_session(&self, session_id: SessionId, password: &str) -> bool {
        let now = self.now_ms();
        let mut state = self.lock();
        let (username, client_ip) = match state.sessions.get(&session_id) {
            Some(s) => (s.username.clone(), s.client_ip.clone()),
            None => return false,
        };
        if !state.ips.is_ip_allowed(&client_ip, now) {
            return false;
        }
        let ok = state.users.authenticate_at(&username, password, now);
        if ok {
            state.ips.clear_failed_attempts(&client_ip);
            let (is_mm, is_admin) = state
                .users
                .get(&username)
                .map(|u| (u.is_market_maker, u.is_admin))
                .unwrap_or((false, false));
            if let Some(session) = state.sessions.get_mut(&session_id) {
                session.is_authenticated = true;
                session.is_market_maker = is_mm;
                session.is_admin = is_admin;
                session.last_heartbeat_ms = now;
            }
        } else {
            state.ips.record_failed_attempt(&client_ip, now);
        }
        ok
    }

    /// The opaque admission check: an authenticated, live, non-rate-limited
    /// session yields the `(session_id, owner_id)` pair the engine sees.
    /// Counts the order and refreshes the heartbeat.
    pub fn admit_order(&self, session_id: SessionId) -> Option<AdmissionTicket> {
        let now = self.now_ms();
        let mut state = self.lock();
        let owner_id = {
            let session = state.sessions.get(&session_id)?;
            if !session.is_authenticated || !session.is_active_at(now) {
                return None;
            }
            state.users.get(&session.username)?.owner_id
        };
        let session = state.sessions.get_mut(&session_id)?;
        if session.is_rate_limited_at(now) {
            return None;
        }
        session.total_orders_placed += 1;
        session.last_heartbeat_ms = now;
        Some(AdmissionTicket {
            session_id,
            owner_id,
            is_market_maker: session.is_market_maker,
        })
    }

    /// Records a cancellation against the session's counters.
    pub fn record_cancellation(&self, session_id: SessionId) {
        if let Some(session) = self.lock().sessions.get_mut(&session_id) {
            session.total_cancellations += 1;
        }
    }

    pub fn heartbeat(&self, session_id: SessionId) {
        let now = self.now_ms();
        if let Some(session) = self.lock().sessions.get_mut(&session_id) {
            session.last_heartbeat_ms = now;
        }
    }

    pub fn remove_session(&self, session_id: SessionId) -> bool {
        let mut state = self.lock();
        let Some(session) = state.sessions.remove(&session_id) else {
            return false;
        };
        state.username_to_session.remove(&session.username);
        state.ips.remove_session(&session.client_ip, session_id);
        true
    }

    /// Drops every timed-out session; returns how many were removed.
    pub fn cleanup_inactive_sessions(&self) -> usize {
        let now = self.now_ms();
        let mut state = self.lock();
        let stale: Vec<SessionId> = state
            .sessions
            .values()
            .filter(|s| !s.is_active_at(now))
            .map(|s| s.session_id)
            .collect();
        for session_id in &stale {
            if let Some(session) = state.sessions.remove(session_id) {
                state.username_to_session.remove(&session.username);
                state.ips.remove_session(&session.client_ip, *session_id);
            }
        }
        stale.len()
    }

    pub fn active_session_count(&self) -> usize {
        self.lock().sessions.len()
    }

    pub fn authenticated_session_count(&self) -> usize {
        self.lock()
            .sessions
            .values()
            .filter(|s| s.is_authenticated)
            .count()
    }

    pub fn session_count_for_ip(&self, ip: &str) -> usize {
        self.lock().ips.session_count(ip)
    }

    pub fn session_stats(&self, session_id: SessionId) -> Option<SessionStats> {
        self.lock().sessions.get(&session_id).map(|s| SessionStats {
            orders_placed: s.total_orders_placed,
            cancellations: s.total_cancellations,
            is_market_maker: s.is_market_maker,
            is_admin: s.is_admin,
        })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
