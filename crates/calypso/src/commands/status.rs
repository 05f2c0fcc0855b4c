//! Status word tables, one per command kind

use crate::FailureKind::{self, *};

use super::CommandKind;

/// How a status word is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Verdict {
    Success,
    /// Success, but the command reports something the caller may care about
    Warning,
    Failure(FailureKind),
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct StatusEntry {
    pub(crate) status: u16,
    pub(crate) verdict: Verdict,
    pub(crate) message: &'static str,
}

const fn ok(status: u16, message: &'static str) -> StatusEntry {
    StatusEntry {
        status,
        verdict: Verdict::Success,
        message,
    }
}

const fn warn(status: u16, message: &'static str) -> StatusEntry {
    StatusEntry {
        status,
        verdict: Verdict::Warning,
        message,
    }
}

const fn fail(status: u16, kind: FailureKind, message: &'static str) -> StatusEntry {
    StatusEntry {
        status,
        verdict: Verdict::Failure(kind),
        message,
    }
}

const SUCCESS: StatusEntry = ok(0x9000, "Successful execution.");

static SELECT_FILE: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6A82, DataAccess, "File not found."),
    ok(0x6119, "Correct execution (ISO7816 T=0)."),
    SUCCESS,
];

static READ_RECORDS: &[StatusEntry] = &[
    fail(0x6981, DataAccess, "Command forbidden on binary files."),
    fail(0x6982, SecurityContext, "Security conditions not fulfilled (PIN code not presented, encryption required)."),
    fail(0x6985, AccessForbidden, "Access forbidden (Never access mode, stored value log file and a stored value operation was done during the current session)."),
    fail(0x6986, DataAccess, "Command not allowed (no current EF)."),
    fail(0x6A82, DataAccess, "File not found."),
    fail(0x6A83, DataOutOfBounds, "Record not found (record index is 0, or above NumRec)."),
    fail(0x6B00, IllegalParameter, "P2 value not supported."),
    SUCCESS,
];

static UPDATE_RECORD: &[StatusEntry] = &[
    fail(0x6400, SessionBufferOverflow, "Too many modifications in session."),
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6981, DataAccess, "Command forbidden on cyclic files when the record exists and is not record 01h and on binary files."),
    fail(0x6982, SecurityContext, "Security conditions not fulfilled (no session, wrong key, encryption required)."),
    fail(0x6985, AccessForbidden, "Access forbidden (Never access mode, DF is invalidated, etc..)."),
    fail(0x6986, DataAccess, "Command not allowed (no current EF)."),
    fail(0x6A82, DataAccess, "File not found."),
    fail(0x6A83, DataOutOfBounds, "Record is not found (record index is 0 or above NumRec)."),
    fail(0x6B00, IllegalParameter, "P2 value not supported."),
    SUCCESS,
];

static APPEND_RECORD: &[StatusEntry] = &[
    fail(0x6400, SessionBufferOverflow, "Too many modifications in session."),
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6981, DataAccess, "The current EF is not a Cyclic EF."),
    fail(0x6982, SecurityContext, "Security conditions not fulfilled (no session, wrong key)."),
    fail(0x6985, AccessForbidden, "Access forbidden (Never access mode, DF is invalidated, etc..)."),
    fail(0x6986, DataAccess, "Command not allowed (no current EF)."),
    fail(0x6A82, DataAccess, "File not found."),
    fail(0x6B00, IllegalParameter, "P1 or P2 value not supported."),
    SUCCESS,
];

static COUNTER: &[StatusEntry] = &[
    fail(0x6400, SessionBufferOverflow, "Too many modifications in session."),
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6981, DataAccess, "The current EF is not a Counters or Simulated Counter EF."),
    fail(0x6982, SecurityContext, "Security conditions not fulfilled (no session, wrong key, encryption required)."),
    fail(0x6985, AccessForbidden, "Access forbidden (Never access mode, DF is invalidated, etc..)."),
    fail(0x6986, DataAccess, "Command not allowed (no current EF)."),
    fail(0x6A80, DataOutOfBounds, "Overflow error."),
    fail(0x6A82, DataAccess, "File not found."),
    fail(0x6B00, IllegalParameter, "P1 or P2 value not supported."),
    ok(0x6103, "Successful execution (possible only in ISO7816 T=0)."),
    SUCCESS,
];

static OPEN_SESSION: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6900, Terminated, "Transaction counter is 0."),
    fail(0x6981, DataAccess, "Command forbidden (read requested and current EF is a Binary file)."),
    fail(0x6982, SecurityContext, "Security conditions not fulfilled (PIN code not presented, AES key forbidding the compatibility mode, encryption required)."),
    fail(0x6985, AccessForbidden, "Access forbidden (Never access mode, Session already opened)."),
    fail(0x6986, DataAccess, "Command not allowed (read requested and no current EF)."),
    fail(0x6A81, IllegalParameter, "Wrong key index."),
    fail(0x6A82, DataAccess, "File not found."),
    fail(0x6A83, DataOutOfBounds, "Record not found (record index is above NumRec)."),
    fail(0x6B00, IllegalParameter, "P1 or P2 value not supported."),
    SUCCESS,
];

static CLOSE_SESSION: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported (signature length does not match the session mode)."),
    fail(0x6B00, IllegalParameter, "P1 or P2 value not supported."),
    fail(0x6988, SecurityData, "Incorrect signature."),
    fail(0x6985, AccessForbidden, "No session was opened."),
    SUCCESS,
];

static SELECT_DIVERSIFIER: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6985, AccessForbidden, "Preconditions not satisfied: the SAM is locked."),
    fail(0x6D00, IllegalParameter, "Instruction unknown."),
    fail(0x6E00, IllegalParameter, "Class not supported."),
    SUCCESS,
];

static GET_CHALLENGE: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6D00, IllegalParameter, "Instruction unknown."),
    fail(0x6E00, IllegalParameter, "Class not supported."),
    SUCCESS,
];

static DIGEST_INIT: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6900, CounterOverflow, "An event counter cannot be incremented."),
    fail(0x6985, AccessForbidden, "Preconditions not satisfied."),
    fail(0x6A00, IllegalParameter, "Incorrect P2."),
    fail(0x6A83, DataAccess, "Record not found: signing key not found."),
    fail(0x6D00, IllegalParameter, "Instruction unknown."),
    fail(0x6E00, IllegalParameter, "Class not supported."),
    SUCCESS,
];

static DIGEST_UPDATE: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6985, AccessForbidden, "Preconditions not satisfied."),
    fail(0x6988, SecurityData, "Incorrect signature."),
    fail(0x6D00, IllegalParameter, "Instruction unknown."),
    fail(0x6E00, IllegalParameter, "Class not supported."),
    SUCCESS,
];

static DIGEST_CLOSE: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6985, AccessForbidden, "Preconditions not satisfied."),
    fail(0x6D00, IllegalParameter, "Instruction unknown."),
    fail(0x6E00, IllegalParameter, "Class not supported."),
    SUCCESS,
];

static DIGEST_AUTHENTICATE: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6985, AccessForbidden, "Preconditions not satisfied."),
    fail(0x6988, SecurityData, "Incorrect signature."),
    fail(0x6D00, IllegalParameter, "Instruction unknown."),
    fail(0x6E00, IllegalParameter, "Class not supported."),
    SUCCESS,
];

static READ_KEY_PARAMETERS: &[StatusEntry] = &[
    fail(0x6700, IllegalParameter, "Lc value not supported."),
    fail(0x6900, AccessForbidden, "Ciphered data mode not allowed for this SAM."),
    fail(0x6A00, IllegalParameter, "P1 or P2 incorrect."),
    fail(0x6A83, DataAccess, "Record not found: key to read not found."),
    warn(0x6200, "Correct execution with warning: data not signed."),
    fail(0x6D00, IllegalParameter, "Instruction unknown."),
    fail(0x6E00, IllegalParameter, "Class not supported."),
    SUCCESS,
];

/// Status table for a command kind
pub(crate) const fn table(kind: CommandKind) -> &'static [StatusEntry] {
    match kind {
        CommandKind::SelectFile => SELECT_FILE,
        CommandKind::ReadRecords => READ_RECORDS,
        CommandKind::UpdateRecord | CommandKind::WriteRecord => UPDATE_RECORD,
        CommandKind::AppendRecord => APPEND_RECORD,
        CommandKind::Increase | CommandKind::Decrease => COUNTER,
        CommandKind::OpenSession => OPEN_SESSION,
        CommandKind::CloseSession | CommandKind::AbortSession => CLOSE_SESSION,
        // The card answer to a ratification frame is never interpreted
        CommandKind::Ratification => &[],
        CommandKind::SelectDiversifier => SELECT_DIVERSIFIER,
        CommandKind::GetChallenge => GET_CHALLENGE,
        CommandKind::DigestInit => DIGEST_INIT,
        CommandKind::DigestUpdate => DIGEST_UPDATE,
        CommandKind::DigestClose => DIGEST_CLOSE,
        CommandKind::DigestAuthenticate => DIGEST_AUTHENTICATE,
        CommandKind::ReadKeyParameters => READ_KEY_PARAMETERS,
    }
}

/// Look up a status word in the table of a command kind
pub(crate) fn lookup(kind: CommandKind, status: u16) -> Option<&'static StatusEntry> {
    table(kind).iter().find(|entry| entry.status == status)
}
