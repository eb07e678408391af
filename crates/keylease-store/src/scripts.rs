// Lua scripts executed atomically by Redis

/// Delete KEYS[1] only if it still holds ARGV[1]; returns 1 or 0
pub(crate) const COMPARE_AND_DELETE: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

/// Reset the lease of KEYS[1] to ARGV[2] milliseconds only if it holds ARGV[1]
pub(crate) const COMPARE_AND_EXTEND: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("pexpire", KEYS[1], ARGV[2])
else
    return 0
end
"#;

/// Returns {exists, pttl, is_owner} for KEYS[1] against owner ARGV[1]
pub(crate) const HEALTH: &str = r#"
local value = redis.call("get", KEYS[1])
if value == false then
    return {0, 0, 0}
end
local ttl = redis.call("pttl", KEYS[1])
if value == ARGV[1] then
    return {1, ttl, 1}
end
return {1, ttl, 0}
"#;
