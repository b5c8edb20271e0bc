use async_trait::async_trait;
use boxoffice_catalog::{PricingEngine, ShowCatalog};
use boxoffice_core::lock::{validate_batch, LAPSE_RETENTION_SECONDS};
use boxoffice_core::repository::BookingRepository;
use boxoffice_core::{
    Booking, BookingDraft, Clock, Grant, GrantedSeat, Lock, LockError, LockManager, SeatConflict,
    SeatId, SeatMap, SessionId, Show, ShowId,
};
use chrono::{DateTime, TimeZone, Utc};
use redis::AsyncCommands;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

const RESTORE_ATTEMPTS: u32 = 3;
const RESTORE_BACKOFF: Duration = Duration::from_millis(50);

// Lock hash values are `session|expires_ms|price`. Session ids never contain `|`.

const ACQUIRE_SCRIPT: &str = r#"
local session = ARGV[1]
local now = tonumber(ARGV[2])
local expires = ARGV[3]
local booked, locked = {}, {}
for i = 4, #ARGV, 2 do
    local seat = ARGV[i]
    if redis.call('SISMEMBER', KEYS[1], seat) == 1 then
        table.insert(booked, seat)
    else
        local cur = redis.call('HGET', KEYS[2], seat)
        if cur then
            local owner, exp = string.match(cur, '^([^|]+)|(%d+)|')
            if tonumber(exp) > now and owner ~= session then
                table.insert(locked, seat)
            end
        end
    end
end
if #booked > 0 or #locked > 0 then
    return {0, booked, locked}
end
local granted = {}
for i = 4, #ARGV, 2 do
    local seat = ARGV[i]
    local cur = redis.call('HGET', KEYS[2], seat)
    local kept = false
    if cur then
        local owner, exp = string.match(cur, '^([^|]+)|(%d+)|')
        if owner == session and tonumber(exp) > now then
            kept = true
            table.insert(granted, seat .. '|' .. cur .. '|0')
        elseif owner ~= session then
            redis.call('HSET', KEYS[3], owner .. '|' .. seat, exp)
        end
    end
    if not kept then
        local value = session .. '|' .. expires .. '|' .. ARGV[i + 1]
        redis.call('HSET', KEYS[2], seat, value)
        redis.call('HDEL', KEYS[3], session .. '|' .. seat)
        table.insert(granted, seat .. '|' .. value .. '|1')
    end
end
return {1, granted, {}}
"#;

const RELEASE_SCRIPT: &str = r#"
local released = {}
for i = 2, #ARGV do
    local seat = ARGV[i]
    local cur = redis.call('HGET', KEYS[1], seat)
    if cur and string.match(cur, '^([^|]+)|') == ARGV[1] then
        redis.call('HDEL', KEYS[1], seat)
        table.insert(released, seat)
    end
    redis.call('HDEL', KEYS[2], ARGV[1] .. '|' .. seat)
end
return released
"#;

/// Moves live owned locks into the booked set. 1 = claimed (returns lock
/// values), 2 = expired seats, 3 = seats not held by the session.
const CLAIM_SCRIPT: &str = r#"
local session = ARGV[1]
local now = tonumber(ARGV[2])
local expired, foreign, values = {}, {}, {}
for i = 3, #ARGV do
    local seat = ARGV[i]
    local cur = redis.call('HGET', KEYS[2], seat)
    local owner, exp = nil, nil
    if cur then
        owner, exp = string.match(cur, '^([^|]+)|(%d+)|')
    end
    if owner == session and tonumber(exp) > now then
        table.insert(values, cur)
    elseif owner == session or redis.call('HEXISTS', KEYS[3], session .. '|' .. seat) == 1 then
        table.insert(expired, seat)
    else
        table.insert(foreign, seat)
    end
end
if #expired > 0 then
    return {2, expired}
end
if #foreign > 0 then
    return {3, foreign}
end
for i = 3, #ARGV do
    redis.call('HDEL', KEYS[2], ARGV[i])
    redis.call('SADD', KEYS[1], ARGV[i])
end
return {1, values}
"#;

/// Undoes a claim when the booking could not be stored.
const RESTORE_SCRIPT: &str = r#"
for i = 1, #ARGV, 2 do
    redis.call('SREM', KEYS[1], ARGV[i])
    redis.call('HSET', KEYS[2], ARGV[i], ARGV[i + 1])
end
return #ARGV / 2
"#;

/// Marks seats sold in storage as booked, dropping any stale lock on them.
const MARK_BOOKED_SCRIPT: &str = r#"
for i = 1, #ARGV do
    redis.call('HDEL', KEYS[2], ARGV[i])
    redis.call('SADD', KEYS[1], ARGV[i])
end
return #ARGV
"#;

const EXPIRE_SCRIPT: &str = r#"
local now = tonumber(ARGV[1])
local horizon = tonumber(ARGV[2])
local freed = {}
local entries = redis.call('HGETALL', KEYS[1])
for i = 1, #entries, 2 do
    local owner, exp = string.match(entries[i + 1], '^([^|]+)|(%d+)|')
    if tonumber(exp) <= now then
        redis.call('HDEL', KEYS[1], entries[i])
        redis.call('HSET', KEYS[2], owner .. '|' .. entries[i], exp)
        table.insert(freed, entries[i])
    end
end
local lapses = redis.call('HGETALL', KEYS[2])
for i = 1, #lapses, 2 do
    if tonumber(lapses[i + 1]) <= horizon then
        redis.call('HDEL', KEYS[2], lapses[i])
    end
end
return freed
"#;

/// Per-show keys share a hash tag so each script touches a single slot.
struct ShowKeys {
    booked: String,
    locks: String,
    lapsed: String,
}

impl ShowKeys {
    fn new(show_id: &ShowId) -> Self {
        Self {
            booked: format!("boxoffice:{{{}}}:booked", show_id),
            locks: format!("boxoffice:{{{}}}:locks", show_id),
            lapsed: format!("boxoffice:{{{}}}:lapsed", show_id),
        }
    }
}

/// Lock manager backed by Redis, for running several API instances against
/// one seat state. Each operation is a single Lua script, which Redis runs
/// atomically; that is the per-show critical section.
pub struct RedisLockManager {
    client: redis::Client,
    catalog: Arc<ShowCatalog>,
    pricing: Arc<PricingEngine>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
}

impl RedisLockManager {
    pub fn new(
        connection_string: &str,
        catalog: Arc<ShowCatalog>,
        pricing: Arc<PricingEngine>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self { client, catalog, pricing, bookings, clock })
    }

    /// Brings the booked set in line with persisted bookings at startup.
    pub async fn restore_booked(&self, show_id: &ShowId, seats: &[SeatId]) -> Result<(), LockError> {
        if seats.is_empty() {
            return Ok(());
        }
        let keys = ShowKeys::new(show_id);
        let script = redis::Script::new(MARK_BOOKED_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(&keys.booked).key(&keys.locks);
        for seat in seats {
            invocation.arg(seat.to_string());
        }

        let mut conn = self.connection().await?;
        let restored: i64 = invocation.invoke_async(&mut conn).await.map_err(storage)?;
        debug!(show = %show_id, "Restored {} booked seats", restored);
        Ok(())
    }

    /// Puts claimed lock values back. Opens its own connection, since the
    /// one used for the claim may be the thing that broke.
    async fn restore_claim(&self, keys: &ShowKeys, seats: &[SeatId], values: &[String]) -> Result<(), LockError> {
        let script = redis::Script::new(RESTORE_SCRIPT);
        let mut restore = script.prepare_invoke();
        restore.key(&keys.booked).key(&keys.locks);
        for (seat, value) in seats.iter().zip(values) {
            restore.arg(seat.to_string()).arg(value);
        }

        let mut conn = self.connection().await?;
        let _: i64 = restore.invoke_async(&mut conn).await.map_err(storage)?;
        Ok(())
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, LockError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(storage)
    }

    fn show(&self, show_id: &ShowId) -> Result<Show, LockError> {
        self.catalog
            .get(show_id)
            .ok_or_else(|| LockError::UnknownShow(show_id.clone()))
    }
}

fn storage(e: redis::RedisError) -> LockError {
    error!("Redis lock operation failed: {}", e);
    LockError::Storage(e.to_string())
}

/// Runs `op` until it succeeds or `attempts` runs out, backing off linearly.
async fn retry<T, F, Fut>(attempts: u32, backoff: Duration, mut op: F) -> Result<T, LockError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, LockError>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                warn!("Attempt {} of {} failed: {}", attempt, attempts, e);
                tokio::time::sleep(backoff * attempt).await;
                attempt += 1;
            }
        }
    }
}

fn seat_list(seats: &[SeatId]) -> String {
    seats.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(",")
}

fn to_millis(at: DateTime<Utc>) -> i64 {
    at.timestamp_millis()
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, LockError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| LockError::Storage(format!("bad timestamp in lock record: {}", ms)))
}

fn decode_lock(show_id: &ShowId, seat: &str, value: &str) -> Result<Lock, LockError> {
    let corrupt = || LockError::Storage(format!("corrupt lock record for seat {}: {}", seat, value));

    let mut parts = value.split('|');
    let (Some(session), Some(expires), Some(price), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(corrupt());
    };

    Ok(Lock {
        show_id: show_id.clone(),
        seat_id: SeatId::parse(seat).map_err(|_| corrupt())?,
        session_id: SessionId::parse(session).map_err(|_| corrupt())?,
        expires_at: from_millis(expires.parse().map_err(|_| corrupt())?)?,
        price: price.parse().map_err(|_| corrupt())?,
    })
}

/// `seat|session|expires_ms|price|new` as returned by the acquire script.
fn decode_granted(show_id: &ShowId, entry: &str) -> Result<GrantedSeat, LockError> {
    let corrupt = || LockError::Storage(format!("corrupt grant entry: {}", entry));

    let (seat, rest) = entry.split_once('|').ok_or_else(corrupt)?;
    let (value, newly) = rest.rsplit_once('|').ok_or_else(corrupt)?;
    let lock = decode_lock(show_id, seat, value)?;
    Ok(GrantedSeat {
        seat_id: lock.seat_id,
        price: lock.price,
        expires_at: lock.expires_at,
        newly_locked: newly == "1",
    })
}

fn parse_seats(raw: Vec<String>) -> Result<Vec<SeatId>, LockError> {
    raw.iter()
        .map(|s| SeatId::parse(s).map_err(|_| LockError::Storage(format!("corrupt seat id: {}", s))))
        .collect()
}

#[async_trait]
impl LockManager for RedisLockManager {
    async fn acquire(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
        ttl_seconds: u64,
    ) -> Result<Grant, LockError> {
        let show = self.show(show_id)?;
        validate_batch(&show.layout, seats)?;
        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .filter(|ttl| *ttl > 0)
            .ok_or_else(|| LockError::InvalidInput("ttlSeconds must be positive".to_string()))?;

        let quote = self.pricing.quote(&show.layout, seats);
        let now = self.clock.now();
        let expires_at = now + chrono::Duration::seconds(ttl);
        let keys = ShowKeys::new(show_id);

        let script = redis::Script::new(ACQUIRE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&keys.booked)
            .key(&keys.locks)
            .key(&keys.lapsed)
            .arg(session_id.as_str())
            .arg(to_millis(now))
            .arg(to_millis(expires_at));
        for (seat, price) in &quote {
            invocation.arg(seat.to_string()).arg(*price);
        }

        let mut conn = self.connection().await?;
        let (ok, first, second): (i64, Vec<String>, Vec<String>) =
            invocation.invoke_async(&mut conn).await.map_err(storage)?;

        if ok == 0 {
            return Err(LockError::Conflict(SeatConflict {
                already_booked: parse_seats(first)?,
                already_locked: parse_seats(second)?,
            }));
        }

        let granted = first
            .iter()
            .map(|entry| decode_granted(show_id, entry))
            .collect::<Result<Vec<_>, _>>()?;
        let grant = Grant { show_id: show_id.clone(), session_id: session_id.clone(), seats: granted };
        info!(show = %show_id, session = %session_id, "Locked {} seats in redis", grant.newly_locked().len());
        Ok(grant)
    }

    async fn release(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
    ) -> Result<Vec<SeatId>, LockError> {
        self.show(show_id)?;
        let keys = ShowKeys::new(show_id);

        let script = redis::Script::new(RELEASE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation.key(&keys.locks).key(&keys.lapsed).arg(session_id.as_str());
        for seat in seats {
            invocation.arg(seat.to_string());
        }

        let mut conn = self.connection().await?;
        let released: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(storage)?;
        parse_seats(released)
    }

    async fn confirm(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
        draft: BookingDraft,
    ) -> Result<Booking, LockError> {
        let show = self.show(show_id)?;
        validate_batch(&show.layout, seats)?;
        let now = self.clock.now();
        let keys = ShowKeys::new(show_id);

        let script = redis::Script::new(CLAIM_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&keys.booked)
            .key(&keys.locks)
            .key(&keys.lapsed)
            .arg(session_id.as_str())
            .arg(to_millis(now));
        for seat in seats {
            invocation.arg(seat.to_string());
        }

        let mut conn = self.connection().await?;
        let (code, payload): (i64, Vec<String>) = invocation.invoke_async(&mut conn).await.map_err(storage)?;
        match code {
            1 => {}
            2 => return Err(LockError::Expired { seats: parse_seats(payload)? }),
            3 => return Err(LockError::NotOwner { seats: parse_seats(payload)? }),
            other => return Err(LockError::Storage(format!("unexpected claim result {}", other))),
        }

        let mut total = 0;
        for (seat, value) in seats.iter().zip(&payload) {
            total += decode_lock(show_id, &seat.to_string(), value)?.price;
        }

        let booking = Booking::from_draft(draft, show_id.clone(), session_id.clone(), seats.to_vec(), total, now);
        if let Err(e) = self.bookings.insert(&booking).await {
            error!(show = %show_id, session = %session_id, "Booking insert failed, restoring locks: {}", e);
            let (keys, values) = (&keys, &payload);
            let restored = retry(RESTORE_ATTEMPTS, RESTORE_BACKOFF, move || {
                self.restore_claim(keys, seats, values)
            })
            .await;
            if let Err(restore_err) = restored {
                error!(
                    show = %show_id,
                    session = %session_id,
                    seats = %seat_list(seats),
                    "Seats left booked without a booking record: {}",
                    restore_err
                );
            }
            return Err(LockError::Storage(e.to_string()));
        }

        info!(show = %show_id, booking_id = %booking.booking_id, "Booked {} seats", seats.len());
        Ok(booking)
    }

    async fn expire(&self, show_id: &ShowId) -> Result<Vec<SeatId>, LockError> {
        let now = self.clock.now();
        let horizon = now - chrono::Duration::seconds(LAPSE_RETENTION_SECONDS);
        let keys = ShowKeys::new(show_id);

        let script = redis::Script::new(EXPIRE_SCRIPT);
        let mut invocation = script.prepare_invoke();
        invocation
            .key(&keys.locks)
            .key(&keys.lapsed)
            .arg(to_millis(now))
            .arg(to_millis(horizon));

        let mut conn = self.connection().await?;
        let freed: Vec<String> = invocation.invoke_async(&mut conn).await.map_err(storage)?;
        let mut freed = parse_seats(freed)?;
        freed.sort();
        Ok(freed)
    }

    async fn seat_map(&self, show_id: &ShowId) -> Result<SeatMap, LockError> {
        let show = self.show(show_id)?;
        let keys = ShowKeys::new(show_id);
        let now = self.clock.now();

        let mut conn = self.connection().await?;
        let booked: Vec<String> = conn.smembers(&keys.booked).await.map_err(storage)?;
        let locks: Vec<(String, String)> = conn.hgetall(&keys.locks).await.map_err(storage)?;

        let mut locked = Vec::new();
        for (seat, value) in locks {
            let lock = decode_lock(show_id, &seat, &value)?;
            if lock.is_live(now) {
                locked.push(lock.seat_id);
            }
        }
        Ok(SeatMap::new(show_id.clone(), show.layout.capacity(), parse_seats(booked)?, locked))
    }

    async fn shows(&self) -> Result<Vec<ShowId>, LockError> {
        Ok(self.catalog.ids())
    }
}
