//! Kubernetes-notation quantity parsing shared by both backends.

/// Nanocores used when a CPU request cannot be parsed (0.1 CPU).
pub const FALLBACK_NANO_CPUS: i64 = 100_000_000;
/// Bytes used when a memory request cannot be parsed (128Mi).
pub const FALLBACK_MEMORY_BYTES: i64 = 134_217_728;

const KI: f64 = 1024.0;

fn parse_number(value: &str) -> Option<f64> {
    let valid = !value.is_empty()
        && value.chars().next().is_some_and(|c| c.is_ascii_digit())
        && value.chars().last().is_some_and(|c| c.is_ascii_digit())
        && value.chars().all(|c| c.is_ascii_digit() || c == '.')
        && value.matches('.').count() <= 1;
    if valid {
        value.parse().ok()
    } else {
        None
    }
}

/// Parses `"500m"` or `"1.5"` into nanocores.
pub fn parse_cpu_nanos(cpu: &str) -> Option<f64> {
    let cpu = cpu.trim();
    match cpu.strip_suffix('m') {
        Some(millis) => parse_number(millis).map(|v| v * 1_000_000.0),
        None => parse_number(cpu).map(|v| v * 1_000_000_000.0),
    }
}

/// Parses `"128Mi"`, `"1Gi"` or a bare byte count into bytes.
pub fn parse_memory_bytes(memory: &str) -> Option<f64> {
    let memory = memory.trim();
    let units = [("Ki", KI), ("Mi", KI * KI), ("Gi", KI * KI * KI), ("Ti", KI * KI * KI * KI)];
    for (suffix, factor) in units {
        if let Some(number) = memory.strip_suffix(suffix) {
            return parse_number(number).map(|v| v * factor);
        }
    }
    parse_number(memory)
}

/// CPU limit or reservation for a Swarm task.
pub fn swarm_nano_cpus(cpu: &str) -> i64 {
    parse_cpu_nanos(cpu)
        .map(|v| v.round() as i64)
        .unwrap_or(FALLBACK_NANO_CPUS)
}

/// Memory limit or reservation for a Swarm task.
pub fn swarm_memory_bytes(memory: &str) -> i64 {
    parse_memory_bytes(memory)
        .map(|v| v.round() as i64)
        .unwrap_or(FALLBACK_MEMORY_BYTES)
}

/// CPU usage reported by metrics-server, in nanocores; unparseable is zero.
pub fn usage_nano_cores(cpu: &str) -> u64 {
    let cpu = cpu.trim();
    let nanos = if let Some(n) = cpu.strip_suffix('n') {
        parse_number(n)
    } else if let Some(u) = cpu.strip_suffix('u') {
        parse_number(u).map(|v| v * 1_000.0)
    } else {
        parse_cpu_nanos(cpu)
    };
    nanos.map(|v| v.round() as u64).unwrap_or(0)
}

/// Memory usage reported by metrics-server, in bytes; unparseable is zero.
pub fn usage_bytes(memory: &str) -> u64 {
    parse_memory_bytes(memory)
        .map(|v| v.round() as u64)
        .unwrap_or(0)
}

/// Cores with three decimals, e.g. `0.250`.
pub fn format_cores(nano_cores: u64) -> String {
    format!("{:.3}", nano_cores as f64 / 1_000_000_000.0)
}

/// Whole mebibytes, e.g. `256Mi`.
pub fn format_mebibytes(bytes: u64) -> String {
    format!("{}Mi", (bytes as f64 / KI / KI).round() as u64)
}
