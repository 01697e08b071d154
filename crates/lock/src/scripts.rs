/// Lua script for acquiring the lock on one master (SET NX PX).
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
/// ARGV\[2\] = lease TTL in milliseconds
///
/// Returns 1 if acquired, 0 otherwise.
pub const ACQUIRE: &str = r"
local ok = redis.call('SET', KEYS[1], ARGV[1], 'NX', 'PX', ARGV[2])
if ok then
    return 1
end
return 0
";

/// Lua script for releasing the lock on one master (compare-and-delete).
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
///
/// Returns 1 if released, 0 if not held by this token.
pub const RELEASE: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == ARGV[1] then
    redis.call('DEL', KEYS[1])
    return 1
end
return 0
";

/// Lua script for extending the lease on one master (compare-and-reset-TTL).
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
/// ARGV\[2\] = new lease TTL in milliseconds
///
/// Returns 1 if extended, 0 if not held by this token.
pub const EXTEND: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == ARGV[1] then
    redis.call('PEXPIRE', KEYS[1], ARGV[2])
    return 1
end
return 0
";

/// Lua script reporting the remaining lease on one master, provided the key
/// is still owned by the presented token.
///
/// KEYS\[1\] = lock key
/// ARGV\[1\] = fencing token
///
/// Returns the key's PTTL in milliseconds, or -3 if the key is missing or
/// owned by a different token. (-3 is distinct from the -1/-2 sentinels PTTL
/// itself can return.)
pub const REMAINING: &str = r"
local owner = redis.call('GET', KEYS[1])
if owner == ARGV[1] then
    return redis.call('PTTL', KEYS[1])
end
return -3
";
