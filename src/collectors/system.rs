use super::{DiskSpace, Fact, FactError, OsFacts};
#[cfg(target_os = "linux")]
use std::fs;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use sysinfo::{System, SystemExt};
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tokio::{runtime, time};
use tracing::debug;

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(10);

/// Linux keeps at most this many bytes of a process name for `pgrep -x`.
const COMM_LEN: usize = 15;

/// Reads facts from the live host: `/proc` files, `pgrep`, `tasklist`,
/// `wmic` (with a PowerShell CIM fallback), `statvfs` and `sysinfo`.
///
/// Every external command is killed and reaped once `command_timeout`
/// passes, so an abandoned snapshot leaves nothing running.
#[derive(Debug, Clone, Copy)]
pub struct SystemFacts {
    command_timeout: Duration,
}

impl SystemFacts {
    pub fn new(command_timeout: Duration) -> Self {
        Self { command_timeout }
    }

    fn run(&self, program: &str, args: &[&str]) -> Result<String, FactError> {
        run_command(program, args, self.command_timeout)
    }

    fn run_wmic(&self, args: &[&str], cim_script: &str) -> Result<String, FactError> {
        match self.run("wmic", args) {
            Ok(text) if !text.trim().is_empty() => Ok(text),
            Ok(_) => self.run_powershell(cim_script),
            Err(err) => {
                debug!(error = %err, "wmic unavailable, falling back to CIM");
                self.run_powershell(cim_script)
            }
        }
    }

    fn run_powershell(&self, script: &str) -> Result<String, FactError> {
        let wrapped_script = format!(
            "[Console]::OutputEncoding=[System.Text.UTF8Encoding]::new($false); {script}"
        );
        self.run("powershell", &["-NoProfile", "-Command", &wrapped_script])
    }
}

impl Default for SystemFacts {
    fn default() -> Self {
        Self::new(DEFAULT_COMMAND_TIMEOUT)
    }
}

impl OsFacts for SystemFacts {
    fn read(&self, fact: &Fact) -> Result<String, FactError> {
        match fact {
            Fact::LoadAverage => read_proc("/proc/loadavg"),
            Fact::Uptime => read_proc("/proc/uptime"),
            Fact::MemInfo => read_proc("/proc/meminfo"),
            Fact::ProcessByName(name) => self.run("pgrep", &["-x", comm_name(name)]),
            Fact::ProcessList => self.run("tasklist", &[]),
            Fact::CpuLoadPercentage => self.run_wmic(
                &["cpu", "get", "LoadPercentage"],
                "'LoadPercentage'; Get-CimInstance Win32_Processor | ForEach-Object { $_.LoadPercentage }",
            ),
            Fact::LastBootUpTime => self.run_wmic(
                &["os", "get", "lastbootuptime"],
                "'LastBootUpTime'; [Management.ManagementDateTimeConverter]::ToDmtfDateTime((Get-CimInstance Win32_OperatingSystem).LastBootUpTime)",
            ),
            Fact::FreePhysicalMemory => self.run_wmic(
                &["OS", "get", "FreePhysicalMemory", "/Value"],
                "'FreePhysicalMemory=' + (Get-CimInstance Win32_OperatingSystem).FreePhysicalMemory",
            ),
            Fact::TotalPhysicalMemory => self.run_wmic(
                &["computersystem", "get", "TotalPhysicalMemory"],
                "'TotalPhysicalMemory'; (Get-CimInstance Win32_ComputerSystem).TotalPhysicalMemory",
            ),
        }
    }

    fn cpu_count(&self) -> Result<usize, FactError> {
        let mut system = System::new();
        system.refresh_cpu();
        match system.cpus().len() {
            0 => Err(FactError::Unsupported("cpu count")),
            n => Ok(n),
        }
    }

    fn disk_space(&self, path: &Path) -> Result<DiskSpace, FactError> {
        volume_space(path).map_err(|source| FactError::Path {
            path: path.display().to_string(),
            source,
        })
    }
}

/// Asks the filesystem that holds `path` directly, so tmpfs and network
/// mounts report their own size.
#[cfg(unix)]
fn volume_space(path: &Path) -> io::Result<DiskSpace> {
    let stats = nix::sys::statvfs::statvfs(path)?;
    let fragment = u64::from(stats.fragment_size());
    Ok(DiskSpace {
        total_bytes: u64::from(stats.blocks()).saturating_mul(fragment),
        available_bytes: u64::from(stats.blocks_available()).saturating_mul(fragment),
    })
}

#[cfg(windows)]
fn volume_space(path: &Path) -> io::Result<DiskSpace> {
    Ok(DiskSpace {
        total_bytes: fs2::total_space(path)?,
        available_bytes: fs2::available_space(path)?,
    })
}

#[cfg(not(any(unix, windows)))]
fn volume_space(_path: &Path) -> io::Result<DiskSpace> {
    Err(io::ErrorKind::Unsupported.into())
}

/// `pgrep -x` compares against the kernel's truncated command name.
fn comm_name(name: &str) -> &str {
    if !cfg!(target_os = "linux") || name.len() <= COMM_LEN {
        return name;
    }
    let mut end = COMM_LEN;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    &name[..end]
}

#[cfg(target_os = "linux")]
fn read_proc(path: &str) -> Result<String, FactError> {
    fs::read_to_string(path).map_err(|source| FactError::Read {
        path: path.to_string(),
        source,
    })
}

/// Hosts without procfs get the same text shapes built from `sysinfo`.
#[cfg(not(target_os = "linux"))]
fn read_proc(path: &str) -> Result<String, FactError> {
    let mut system = System::new();
    match path {
        "/proc/loadavg" => {
            let load = system.load_average();
            Ok(format!("{:.2} {:.2} {:.2}", load.one, load.five, load.fifteen))
        }
        "/proc/uptime" => Ok(format!("{} 0", system.uptime())),
        "/proc/meminfo" => {
            system.refresh_memory();
            Ok(format!(
                "MemTotal: {} kB\nMemFree: {} kB\n",
                system.total_memory() / super::BYTES_PER_KB,
                system.free_memory() / super::BYTES_PER_KB
            ))
        }
        _ => Err(FactError::Unsupported("procfs")),
    }
}

/// Runs `program` on a private current-thread runtime. Callers are the
/// blocking samplers, never async code.
fn run_command(program: &str, args: &[&str], limit: Duration) -> Result<String, FactError> {
    let rt = runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|source| spawn_error(program, source))?;
    rt.block_on(output_within(program, args, limit))
}

async fn output_within(program: &str, args: &[&str], limit: Duration) -> Result<String, FactError> {
    let mut child = Command::new(program)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| spawn_error(program, source))?;
    let mut stdout = child.stdout.take();

    let finished = time::timeout(limit, async {
        let mut buf = Vec::new();
        if let Some(out) = stdout.as_mut() {
            out.read_to_end(&mut buf).await?;
        }
        let status = child.wait().await?;
        Ok::<_, io::Error>((status, buf))
    })
    .await;

    match finished {
        Ok(Ok((status, buf))) if status.success() => Ok(decode_cmd_stdout(&buf)),
        Ok(Ok((status, _))) => Err(FactError::Status {
            command: program.to_string(),
            status: status.to_string(),
        }),
        Ok(Err(source)) => Err(spawn_error(program, source)),
        Err(_) => {
            // kill() also waits, so the child does not linger as a zombie.
            if let Err(err) = child.kill().await {
                debug!(command = program, error = %err, "failed to kill timed out command");
            }
            Err(FactError::Timeout {
                command: program.to_string(),
                after: limit,
            })
        }
    }
}

fn spawn_error(program: &str, source: io::Error) -> FactError {
    FactError::Spawn {
        command: program.to_string(),
        source,
    }
}

/// `wmic` writes UTF-16LE when its output is redirected.
fn decode_cmd_stdout(bytes: &[u8]) -> String {
    if let Ok(utf8) = std::str::from_utf8(bytes) {
        if !utf8.contains('\0') {
            return utf8.to_string();
        }
    }

    if bytes.len() >= 2 && bytes.len() % 2 == 0 {
        let u16buf: Vec<u16> = bytes
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        if let Ok(s) = String::from_utf16(&u16buf) {
            return s.trim_start_matches('\u{feff}').to_string();
        }
    }

    String::from_utf8_lossy(bytes).to_string()
}
