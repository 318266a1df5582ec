//! 外部命令执行：输出写入临时文件，轮询读取新增内容并转发到日志

use super::parser::clean_terminal_line;
use super::types::{CommandStatus, CondaError};
use std::fs::File;
use std::io::Read;
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};
use tempfile::NamedTempFile;
use tokio::process::{Child, Command};
use tokio::sync::{mpsc, oneshot};

/// 取消时 SIGINT 之后等待的时间，超时升级为 SIGTERM
pub const INTERRUPT_GRACE: Duration = Duration::from_secs(5);
/// SIGTERM 之后等待的时间，超时 SIGKILL
pub const TERMINATE_GRACE: Duration = Duration::from_secs(1);

/// 输出重定向到临时文件的子进程。
///
/// 子进程和读取端各持有一个文件句柄，读取端记住上次读到的位置。
/// Unix 下子进程自成一个进程组，信号发给整个组。
/// 丢弃时杀掉仍在运行的子进程并删除临时文件。
pub struct CapturedProcess {
    child: Child,
    reader: File,
    _output: NamedTempFile,
}

impl CapturedProcess {
    /// `merge_stderr` 为真时 stderr 也写入同一文件，否则丢弃
    pub fn spawn(program: &str, args: &[String], merge_stderr: bool) -> Result<Self, CondaError> {
        let output = NamedTempFile::new()?;
        let reader = output.reopen()?;
        let stdout = output.as_file().try_clone()?;
        let stderr = if merge_stderr {
            Stdio::from(output.as_file().try_clone()?)
        } else {
            Stdio::null()
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout))
            .stderr(stderr)
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let child = command
            .spawn()
            .map_err(|source| CondaError::Spawn {
                program: program.to_string(),
                source,
            })?;

        Ok(Self {
            child,
            reader,
            _output: output,
        })
    }

    pub fn try_wait(&mut self) -> std::io::Result<Option<ExitStatus>> {
        self.child.try_wait()
    }

    /// 读取自上次调用以来新写入的字节
    pub fn read_new(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.reader.read_to_end(&mut buf)?;
        Ok(buf)
    }

    pub async fn kill(&mut self) {
        #[cfg(unix)]
        self.signal(libc::SIGKILL);
        if let Err(e) = self.child.kill().await {
            log::warn!("结束子进程失败: {}", e);
        }
    }

    /// 向子进程所在的进程组发送信号，进程已回收时什么也不做
    #[cfg(unix)]
    fn signal(&self, signal: libc::c_int) {
        if let Some(pid) = self.child.id() {
            // SAFETY: 只向自己创建的进程组发送信号
            unsafe {
                libc::kill(-(pid as libc::pid_t), signal);
            }
        }
    }

    /// 在 `grace` 内等待退出
    async fn wait_for(
        &mut self,
        grace: Duration,
        interval: Duration,
    ) -> std::io::Result<Option<ExitStatus>> {
        let deadline = Instant::now().checked_add(grace);
        loop {
            if let Some(status) = self.child.try_wait()? {
                return Ok(Some(status));
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                return Ok(None);
            }
            tokio::time::sleep(interval).await;
        }
    }

    /// 逐步结束子进程：SIGINT，等待 `INTERRUPT_GRACE`；SIGTERM，等待 `TERMINATE_GRACE`；最后 SIGKILL。
    /// 给 conda 留出回滚和清理的机会。
    pub async fn shutdown(&mut self, interval: Duration) -> std::io::Result<ExitStatus> {
        #[cfg(unix)]
        for (signal, grace) in [
            (libc::SIGINT, INTERRUPT_GRACE),
            (libc::SIGTERM, TERMINATE_GRACE),
        ] {
            self.signal(signal);
            if let Some(status) = self.wait_for(grace, interval).await? {
                return Ok(status);
            }
            log::warn!("子进程未响应信号 {}，继续升级", signal);
        }
        self.kill().await;
        self.child.wait().await
    }
}

/// 按 `\n` 切分字节流，跨读取边界的半行留到下次
#[derive(Debug, Default)]
pub struct LineBuffer {
    pending: Vec<u8>,
}

impl LineBuffer {
    pub fn push(&mut self, bytes: &[u8]) -> Vec<String> {
        self.pending.extend_from_slice(bytes);
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.iter().position(|&b| b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            lines.push(clean_terminal_line(&String::from_utf8_lossy(
                &line[..line.len() - 1],
            )));
        }
        lines
    }

    /// 进程结束后剩下的不完整行
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            return None;
        }
        let rest = std::mem::take(&mut self.pending);
        Some(clean_terminal_line(&String::from_utf8_lossy(&rest)))
    }
}

/// 结束行文本
pub fn completion_line(status: &CommandStatus) -> Option<String> {
    match status {
        CommandStatus::Exited(code) => Some(format!("[完成] 退出码: {}", code)),
        CommandStatus::Signalled => Some("[终止] 进程被信号结束".to_string()),
        CommandStatus::Failed(_) => None,
    }
}

fn forward(
    process: &mut CapturedProcess,
    lines: &mut LineBuffer,
    sink: &mpsc::UnboundedSender<String>,
) {
    match process.read_new() {
        Ok(bytes) if !bytes.is_empty() => {
            for line in lines.push(&bytes) {
                let _ = sink.send(line);
            }
        }
        Ok(_) => {}
        Err(e) => log::warn!("读取命令输出失败: {}", e),
    }
}

/// 执行 `argv`，把输出按写入顺序逐行转发到 `sink`，最后发送一行结束状态。
///
/// 无法启动时向 `sink` 发送一行错误，不发送结束行。
/// 每次轮询之间让出 `interval`，不阻塞事件循环。
/// `cancel` 收到消息或发送端被丢弃时，按 [`CapturedProcess::shutdown`] 结束子进程并等待它退出。
pub async fn run_command(
    argv: &[String],
    sink: &mpsc::UnboundedSender<String>,
    interval: Duration,
    mut cancel: oneshot::Receiver<()>,
) -> CommandStatus {
    let Some((program, args)) = argv.split_first() else {
        let _ = sink.send("✗ 命令不能为空".to_string());
        return CommandStatus::Failed("命令不能为空".to_string());
    };

    let mut process = match CapturedProcess::spawn(program, args, true) {
        Ok(process) => process,
        Err(e) => {
            log::error!("命令启动失败 {:?}: {}", argv, e);
            let _ = sink.send(format!("✗ {}", e));
            return CommandStatus::Failed(e.to_string());
        }
    };
    log::info!("执行命令: {}", argv.join(" "));

    let mut lines = LineBuffer::default();
    let exit = loop {
        forward(&mut process, &mut lines, sink);
        match process.try_wait() {
            Ok(Some(status)) => break Ok(status),
            Ok(None) => {}
            Err(e) => break Err(e),
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = &mut cancel => {
                log::info!("取消命令: {}", argv.join(" "));
                let _ = sink.send("[取消] 正在结束进程...".to_string());
                break process.shutdown(interval).await;
            }
        }
    };

    // 退出后把剩余输出读完
    forward(&mut process, &mut lines, sink);
    if let Some(rest) = lines.finish() {
        let _ = sink.send(rest);
    }

    let status = match exit {
        Ok(status) => match status.code() {
            Some(code) => CommandStatus::Exited(code),
            None => CommandStatus::Signalled,
        },
        Err(e) => {
            let _ = sink.send(format!("✗ 等待进程失败: {}", e));
            CommandStatus::Failed(e.to_string())
        }
    };
    if let Some(line) = completion_line(&status) {
        let _ = sink.send(line);
    }
    log::info!("命令结束 {:?}: {:?}", argv, status);
    status
}
