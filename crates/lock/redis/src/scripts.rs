/// Lua script for acquiring a lock (SET NX PX).
///
/// Redis drops the key once its PX expiry passes, so "absent" covers both a
/// never-written and an expired record.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = owner token
/// ARGV\[2\] = TTL in milliseconds
///
/// Returns 1 if acquired, 0 otherwise.
pub const LOCK_ACQUIRE: &str = r"
local ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
if ok then
    return 1
end
return 0
";

/// Lua script for releasing a lock.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = owner token
///
/// Returns 1 if released, 0 if not held by this owner.
pub const LOCK_RELEASE: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
";

/// Lua script for refreshing a lock's TTL.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = owner token
/// ARGV\[2\] = new TTL in milliseconds
///
/// Returns 1 if refreshed, 0 if not held by this owner.
pub const LOCK_REFRESH: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
";
