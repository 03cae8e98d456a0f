pub const USAGE: &str = r#"sqlbackup
Drives SQL Server's own backup, restore and maintenance statements.
Backup files are plain SQL Server backup sets and can also be restored
by the server directly.

Usage:
  sqlbackup [--config <path>] [-v] <mode> /C <connstr> [args]

Modes:
  /LIST      List all user databases
  /BACKUP    Back up databases          (location, databases, /LOG, /VERIFY)
  /RESTORE   Restore databases          (location, databases, /ID <num>, /DISMOUNT)
  /MODE      Change recovery model      (databases, /FULL | /BULK | /SIMPLE)
  /INFO      Show backup sets           (databases and/or location, /JSON)
  /DBINFO    Show database details      (databases, /JSON)
  /PURGE     Delete server-side backup history (databases)
  /OFFLINE   Take databases offline     (databases)
  /ONLINE    Take databases online      (databases)
  /? /HELP   Show this text

Connection:
  /C <connstr>   ADO-style connection string, e.g.
                 /C "Server=SQLSRV\Named;User Id=backup"
                 A missing password is read from SQLCMDPASSWORD or prompted.
  /C LOCAL       (localdb)\MSSQLLocalDB, Windows authentication, encryption optional
  /C EXPRESS     .\SQLEXPRESS, Windows authentication, encryption optional

Databases (names are case-insensitive):
  /ALL             every user database
  /ALL dev test    every user database except 'dev' and 'test'
  /DB prod legacy  only 'prod' and 'legacy'

Location (paths are resolved on the database server):
  /DIR <path>    one file per database: <path>/<name>.db.bak
  /FILE <path>   a single file for every database

Restore ids:
  By default the newest backup set is restored. /ID -1 is the newest,
  /ID -2 the one before it, and so on. A positive /ID is the absolute
  backup set position inside the file.

Exit codes:
  0  success
  1  invalid command line or setup failure, nothing was done
  N  N databases failed, all others were processed

Examples:
  sqlbackup /BACKUP /C LOCAL /DIR D:\SqlBackup /ALL dev /VERIFY
  sqlbackup /RESTORE /C LOCAL /DIR D:\SqlBackup /DB dev test /ID -2
  sqlbackup /MODE /C LOCAL /ALL dev /FULL
"#;
