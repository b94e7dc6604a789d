//! Parsers for the kernel stat files the readers consume.

/// Error type for stat-file parse failures.
#[derive(Debug, Clone)]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "parse error: {}", self.message)
    }
}

impl std::error::Error for ParseError {}

/// The eight jiffy counters of a `/proc/stat` cpu line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuCounters {
    pub user: u64,
    pub nice: u64,
    pub system: u64,
    pub idle: u64,
    pub iowait: u64,
    pub irq: u64,
    pub softirq: u64,
    pub steal: u64,
}

impl CpuCounters {
    pub fn idle_total(&self) -> u64 {
        self.idle + self.iowait
    }

    pub fn active_total(&self) -> u64 {
        self.user + self.nice + self.system + self.irq + self.softirq + self.steal
    }

    pub fn grand_total(&self) -> u64 {
        self.idle_total() + self.active_total()
    }
}

/// One `cpu*` line; `id` is `None` for the aggregate line.
#[derive(Debug, Clone, Copy)]
pub struct CpuLine {
    pub id: Option<u32>,
    pub counters: CpuCounters,
}

/// Parsed `/proc/stat`, restricted to the `cpu*` lines.
#[derive(Debug, Clone, Default)]
pub struct HostStat {
    pub lines: Vec<CpuLine>,
}

impl HostStat {
    /// The aggregate `cpu` line, if present.
    pub fn aggregate(&self) -> Option<&CpuCounters> {
        self.lines
            .iter()
            .find(|line| line.id.is_none())
            .map(|line| &line.counters)
    }
}

/// Parses the `cpu*` lines of `/proc/stat`.
///
/// Missing trailing counters default to 0 (older kernels export fewer
/// fields). An empty file or a file without any `cpu*` line is an error.
pub fn parse_host_stat(content: &str) -> Result<HostStat, ParseError> {
    let mut lines = Vec::new();

    for line in content.lines() {
        let mut tokens = line.split_whitespace();
        let Some(first) = tokens.next() else {
            continue;
        };
        if !first.starts_with("cpu") {
            continue;
        }

        let id = if first == "cpu" {
            None
        } else {
            match first[3..].parse::<u32>() {
                Ok(id) => Some(id),
                // "cpufreq" or similar: not a cpu line
                Err(_) => continue,
            }
        };

        let mut fields = [0u64; 8];
        for (i, slot) in fields.iter_mut().enumerate() {
            match tokens.next() {
                Some(tok) => {
                    *slot = tok.parse().map_err(|_| {
                        ParseError::new(format!("invalid counter {} in line {:?}", i + 1, first))
                    })?;
                }
                None => break,
            }
        }

        lines.push(CpuLine {
            id,
            counters: CpuCounters {
                user: fields[0],
                nice: fields[1],
                system: fields[2],
                idle: fields[3],
                iowait: fields[4],
                irq: fields[5],
                softirq: fields[6],
                steal: fields[7],
            },
        });
    }

    if lines.is_empty() {
        return Err(ParseError::new("no cpu lines in stat file"));
    }
    Ok(HostStat { lines })
}

/// The fields of `/proc/<pid>/stat` the process reader needs.
#[derive(Debug, Clone)]
pub struct PidStat {
    pub pid: i32,
    pub comm: String,
    pub state: char,
    pub ppid: i32,
    /// Field 14, jiffies in user mode.
    pub utime: u64,
    /// Field 15, jiffies in kernel mode.
    pub stime: u64,
    /// Field 22, process start time in jiffies since boot.
    pub starttime: u64,
}

impl PidStat {
    /// `utime + stime`, the process's total active jiffies.
    pub fn active_ticks(&self) -> u64 {
        self.utime + self.stime
    }
}

/// Parses a `/proc/<pid>/stat` line.
///
/// The `comm` field is enclosed in parentheses and may itself contain
/// whitespace and `)` characters, so the split happens at the **last** `)`.
pub fn parse_pid_stat(content: &str) -> Result<PidStat, ParseError> {
    let content = content.trim();

    let open_paren = content
        .find('(')
        .ok_or_else(|| ParseError::new("missing '(' in stat"))?;
    let close_paren = content
        .rfind(')')
        .ok_or_else(|| ParseError::new("missing ')' in stat"))?;
    if close_paren <= open_paren {
        return Err(ParseError::new("invalid parentheses in stat"));
    }

    let pid: i32 = content[..open_paren]
        .trim()
        .parse()
        .map_err(|_| ParseError::new("invalid pid"))?;
    let comm = content[open_paren + 1..close_paren].to_string();

    let fields: Vec<&str> = content[close_paren + 1..].split_whitespace().collect();
    // state .. starttime span fields 3..=22, i.e. indexes 0..=19 here
    if fields.len() < 20 {
        return Err(ParseError::new(format!(
            "not enough fields in stat: expected 20+, got {}",
            fields.len()
        )));
    }

    let parse_u64 = |idx: usize, name: &str| -> Result<u64, ParseError> {
        fields[idx]
            .parse()
            .map_err(|_| ParseError::new(format!("invalid {}", name)))
    };

    Ok(PidStat {
        pid,
        comm,
        state: fields[0].chars().next().unwrap_or('?'),
        ppid: fields[1]
            .parse()
            .map_err(|_| ParseError::new("invalid ppid"))?,
        utime: parse_u64(11, "utime")?,
        stime: parse_u64(12, "stime")?,
        starttime: parse_u64(19, "starttime")?,
    })
}
