// Names Python provides without an import

use once_cell::sync::Lazy;
use std::collections::HashSet;

static BUILTINS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        // functions
        "abs", "aiter", "all", "anext", "any", "ascii", "bin", "breakpoint", "callable", "chr",
        "compile", "delattr", "dir", "divmod", "eval", "exec", "exit", "filter", "format",
        "getattr", "globals", "hasattr", "hash", "help", "hex", "id", "input", "isinstance",
        "issubclass", "iter", "len", "locals", "map", "max", "min", "next", "oct", "open", "ord",
        "pow", "print", "quit", "repr", "reversed", "round", "setattr", "sorted", "sum", "super",
        "vars", "zip", "__import__",
        // types
        "bool", "bytearray", "bytes", "classmethod", "complex", "dict", "enumerate", "float",
        "frozenset", "int", "list", "memoryview", "object", "property", "range", "set", "slice",
        "staticmethod", "str", "tuple", "type",
        // constants
        "True", "False", "None", "Ellipsis", "NotImplemented", "__name__", "__file__", "__doc__",
        "__package__", "__spec__", "__builtins__", "__debug__",
        // exceptions
        "ArithmeticError", "AssertionError", "AttributeError", "BaseException",
        "BaseExceptionGroup", "BlockingIOError", "BrokenPipeError", "BufferError",
        "BytesWarning", "ChildProcessError", "ConnectionAbortedError", "ConnectionError",
        "ConnectionRefusedError", "ConnectionResetError", "DeprecationWarning", "EOFError",
        "EnvironmentError", "Exception", "ExceptionGroup", "FileExistsError",
        "FileNotFoundError", "FloatingPointError", "FutureWarning", "GeneratorExit", "IOError",
        "ImportError", "ImportWarning", "IndentationError", "IndexError", "InterruptedError",
        "IsADirectoryError", "KeyError", "KeyboardInterrupt", "LookupError", "MemoryError",
        "ModuleNotFoundError", "NameError", "NotADirectoryError", "NotImplementedError",
        "OSError", "OverflowError", "PendingDeprecationWarning", "PermissionError",
        "ProcessLookupError", "RecursionError", "ReferenceError", "ResourceWarning",
        "RuntimeError", "RuntimeWarning", "StopAsyncIteration", "StopIteration", "SyntaxError",
        "SyntaxWarning", "SystemError", "SystemExit", "TabError", "TimeoutError", "TypeError",
        "UnboundLocalError", "UnicodeDecodeError", "UnicodeEncodeError", "UnicodeError",
        "UnicodeTranslateError", "UnicodeWarning", "UserWarning", "ValueError", "Warning",
        "ZeroDivisionError",
    ]
    .into_iter()
    .collect()
});

pub fn is_builtin(name: &str) -> bool {
    BUILTINS.contains(name)
}
