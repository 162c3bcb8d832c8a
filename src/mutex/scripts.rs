//! Lua sources run atomically on the server.

/// Acquires the lock or joins the wait queue.
///
/// KEYS: lock, queue. ARGV: token, lock TTL (ms), queue TTL (ms).
///
/// Returns 1 when the caller holds the lock, 2 when it was granted from the
/// head of the queue, and `-n` when the caller waits at position `n`.
pub(crate) const LOCK: &str = r#"
local token = ARGV[1]
local lock_ttl = tonumber(ARGV[2])
local queue_ttl = tonumber(ARGV[3])

local owner = redis.call('GET', KEYS[1])
if owner == token then
    redis.call('PEXPIRE', KEYS[1], lock_ttl)
    return 1
end

if not owner then
    local head = redis.call('LPOP', KEYS[2])
    if not head then
        redis.call('SET', KEYS[1], token, 'PX', lock_ttl)
        return 1
    end
    redis.call('SET', KEYS[1], head, 'PX', lock_ttl)
    if head == token then
        return 2
    end
end

local waiting = redis.call('LRANGE', KEYS[2], 0, -1)
for i, waiter in ipairs(waiting) do
    if waiter == token then
        redis.call('PEXPIRE', KEYS[2], queue_ttl)
        return -i
    end
end

local position = redis.call('RPUSH', KEYS[2], token)
redis.call('PEXPIRE', KEYS[2], queue_ttl)
return -position
"#;

/// Deletes the lock if it still holds the caller's token.
///
/// KEYS: lock. ARGV: token. Returns 1 if deleted, 0 otherwise.
pub(crate) const UNLOCK: &str = r#"
if redis.call('GET', KEYS[1]) == ARGV[1] then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

/// Extends every lock that still holds its token.
///
/// KEYS: locks. ARGV: TTL (ms), then one token per key.
/// Returns one flag per key: 1 if extended, 0 otherwise.
pub(crate) const RENEW: &str = r#"
local ttl = tonumber(ARGV[1])
local renewed = {}
for i, key in ipairs(KEYS) do
    if redis.call('GET', key) == ARGV[i + 1] then
        redis.call('PEXPIRE', key, ttl)
        renewed[i] = 1
    else
        renewed[i] = 0
    end
end
return renewed
"#;
