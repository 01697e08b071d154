/// Lua script raising a counter to a target value, never lowering it.
///
/// KEYS\[1\] = counter key
/// ARGV\[1\] = target value
///
/// Returns 1 if the counter was raised, 0 if it was already at or above the
/// target.
pub const RAISE_TO: &str = r"
local current = tonumber(redis.call('GET', KEYS[1]) or '0')
local target = tonumber(ARGV[1])
if target > current then
    redis.call('SET', KEYS[1], ARGV[1])
    return 1
end
return 0
";
