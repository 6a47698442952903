//! Windows process creation under another account via `CreateProcessWithLogonW`

use super::job::KillOnCloseJob;
use super::{Impersonation, Pipe, ProcessSpec};
use secrecy::ExposeSecret;
use std::ffi::OsStr;
use std::fs::File;
use std::io;
use std::mem;
use std::os::windows::ffi::OsStrExt;
use std::os::windows::io::{AsRawHandle, FromRawHandle, OwnedHandle, RawHandle};
use std::ptr;
use tracing::debug;
use winapi::shared::minwindef::{DWORD, TRUE};
use winapi::um::handleapi::{SetHandleInformation, INVALID_HANDLE_VALUE};
use winapi::um::minwinbase::SECURITY_ATTRIBUTES;
use winapi::um::namedpipeapi::CreatePipe;
use winapi::um::processenv::GetStdHandle;
use winapi::um::processthreadsapi::{
    GetExitCodeProcess, ResumeThread, TerminateProcess, PROCESS_INFORMATION, STARTUPINFOW,
};
use winapi::um::synchapi::WaitForSingleObject;
use winapi::um::winbase::{
    CreateProcessWithLogonW, CREATE_NO_WINDOW, CREATE_SUSPENDED, CREATE_UNICODE_ENVIRONMENT,
    HANDLE_FLAG_INHERIT,
    INFINITE, LOGON_WITH_PROFILE, STARTF_USESTDHANDLES, STD_ERROR_HANDLE, STD_OUTPUT_HANDLE,
    WAIT_FAILED,
};
use winapi::um::winnt::HANDLE;
use zeroize::Zeroize;

/// Child started under another account, inside its own job
pub(super) struct LogonChild {
    process: OwnedHandle,
    job: KillOnCloseJob,
    stdout: Option<File>,
    stderr: Option<File>,
    reaped: bool,
}

impl LogonChild {
    pub(super) fn take_stdout(&mut self) -> Option<Pipe> {
        self.stdout
            .take()
            .map(|f| Box::new(tokio::fs::File::from_std(f)) as Pipe)
    }

    pub(super) fn take_stderr(&mut self) -> Option<Pipe> {
        self.stderr
            .take()
            .map(|f| Box::new(tokio::fs::File::from_std(f)) as Pipe)
    }

    pub(super) async fn wait(&mut self) -> io::Result<Option<i32>> {
        let process = self.process.try_clone()?;
        let code = tokio::task::spawn_blocking(move || wait_for_exit(&process))
            .await
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e))??;
        self.reaped = true;
        Ok(code)
    }

    pub(super) async fn kill(&mut self) -> io::Result<()> {
        self.job.terminate()?;
        self.wait().await.map(|_| ())
    }
}

impl Drop for LogonChild {
    fn drop(&mut self) {
        if !self.reaped {
            unsafe {
                TerminateProcess(raw(&self.process), 1);
            }
        }
    }
}

fn raw(handle: &OwnedHandle) -> HANDLE {
    handle.as_raw_handle() as HANDLE
}

fn wait_for_exit(process: &OwnedHandle) -> io::Result<Option<i32>> {
    unsafe {
        if WaitForSingleObject(raw(process), INFINITE) == WAIT_FAILED {
            return Err(io::Error::last_os_error());
        }

        let mut code: DWORD = 0;
        if GetExitCodeProcess(raw(process), &mut code) == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok(Some(code as i32))
    }
}

fn to_wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

/// Anonymous pipe whose write end is inheritable and read end is not
fn pipe() -> io::Result<(OwnedHandle, OwnedHandle)> {
    let mut attributes = SECURITY_ATTRIBUTES {
        nLength: mem::size_of::<SECURITY_ATTRIBUTES>() as DWORD,
        lpSecurityDescriptor: ptr::null_mut(),
        bInheritHandle: TRUE,
    };

    let mut read: HANDLE = ptr::null_mut();
    let mut write: HANDLE = ptr::null_mut();

    unsafe {
        if CreatePipe(&mut read, &mut write, &mut attributes, 0) == 0 {
            return Err(io::Error::last_os_error());
        }

        let read = OwnedHandle::from_raw_handle(read as RawHandle);
        let write = OwnedHandle::from_raw_handle(write as RawHandle);

        if SetHandleInformation(raw(&read), HANDLE_FLAG_INHERIT, 0) == 0 {
            return Err(io::Error::last_os_error());
        }

        Ok((read, write))
    }
}

/// `DOMAIN\user` is split; anything else is passed with no domain
fn split_account(account: &str) -> (Option<&str>, &str) {
    match account.split_once('\\') {
        Some((domain, user)) => (Some(domain), user),
        None => (None, account),
    }
}

fn command_line(spec: &ProcessSpec) -> String {
    let mut line = format!("\"{}\"", spec.program);
    for arg in &spec.args {
        line.push(' ');
        if spec.verbatim_args || !arg.contains([' ', '\t']) {
            line.push_str(arg);
        } else {
            line.push('"');
            line.push_str(arg);
            line.push('"');
        }
    }
    line
}

pub(super) fn spawn(
    spec: &ProcessSpec,
    login: &Impersonation,
    capture_stdout: bool,
    capture_stderr: bool,
) -> io::Result<LogonChild> {
    let stdout_pipe = if capture_stdout { Some(pipe()?) } else { None };
    let stderr_pipe = if capture_stderr { Some(pipe()?) } else { None };

    let (domain, user) = split_account(login.user());
    let user = to_wide(user);
    let domain = domain.map(to_wide);
    let mut cmdline = to_wide(&command_line(spec));
    let working_dir = spec.working_dir.as_deref().map(to_wide);

    let mut startup: STARTUPINFOW = unsafe { mem::zeroed() };
    startup.cb = mem::size_of::<STARTUPINFOW>() as DWORD;
    startup.dwFlags = STARTF_USESTDHANDLES;
    startup.hStdInput = ptr::null_mut();
    startup.hStdOutput = match &stdout_pipe {
        Some((_, write)) => raw(write),
        None => unsafe { GetStdHandle(STD_OUTPUT_HANDLE) },
    };
    startup.hStdError = match &stderr_pipe {
        Some((_, write)) => raw(write),
        None => unsafe { GetStdHandle(STD_ERROR_HANDLE) },
    };
    if startup.hStdOutput == INVALID_HANDLE_VALUE || startup.hStdError == INVALID_HANDLE_VALUE {
        return Err(io::Error::last_os_error());
    }

    let mut info: PROCESS_INFORMATION = unsafe { mem::zeroed() };

    let mut password = to_wide(login.password().expose_secret());
    let created = unsafe {
        CreateProcessWithLogonW(
            user.as_ptr(),
            domain.as_ref().map_or(ptr::null(), |d| d.as_ptr()),
            password.as_ptr(),
            LOGON_WITH_PROFILE,
            ptr::null(),
            cmdline.as_mut_ptr(),
            CREATE_NO_WINDOW | CREATE_UNICODE_ENVIRONMENT | CREATE_SUSPENDED,
            ptr::null_mut(),
            working_dir.as_ref().map_or(ptr::null(), |d| d.as_ptr()),
            &mut startup,
            &mut info,
        )
    };
    password.zeroize();

    if created == 0 {
        return Err(io::Error::last_os_error());
    }

    let process = unsafe { OwnedHandle::from_raw_handle(info.hProcess as RawHandle) };
    let thread = unsafe { OwnedHandle::from_raw_handle(info.hThread as RawHandle) };

    // Joined while suspended so nothing it starts can escape the job.
    let job = match KillOnCloseJob::new().and_then(|job| job.assign(raw(&process)).map(|_| job)) {
        Ok(job) => job,
        Err(e) => {
            unsafe {
                TerminateProcess(raw(&process), 1);
            }
            return Err(e);
        }
    };
    if unsafe { ResumeThread(raw(&thread)) } == DWORD::MAX {
        let e = io::Error::last_os_error();
        drop(job);
        return Err(e);
    }

    debug!(pid = info.dwProcessId, "Logon process started");

    // Write ends close here so the drains see end of stream when the child exits.
    Ok(LogonChild {
        process,
        job,
        stdout: stdout_pipe.map(|(read, _write)| File::from(read)),
        stderr: stderr_pipe.map(|(read, _write)| File::from(read)),
        reaped: false,
    })
}
