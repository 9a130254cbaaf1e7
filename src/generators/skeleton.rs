//! The fixed JavaScript runtime embedded verbatim into every emitted
//! parser.
//!
//! Split in three: module-level helpers (the error class and the default
//! tracer), per-parse helpers (state, failure tracking, location
//! arithmetic) that live inside the generated `peg$parse` function, and
//! the driver that turns the start rule's result into a value, a library
//! descriptor or a thrown error.

/// Module-scope helpers: subclassing, the syntax error type and its
/// message/format rendering
pub(crate) const OUTER_HELPERS: &str = r#"function peg$subclass(child, parent) {
  function C() { this.constructor = child; }
  C.prototype = parent.prototype;
  child.prototype = new C();
}

function peg$SyntaxError(message, expected, found, location) {
  var self = Error.call(this, message);
  if (Object.setPrototypeOf) {
    Object.setPrototypeOf(self, peg$SyntaxError.prototype);
  }
  self.expected = expected;
  self.found = found;
  self.location = location;
  self.name = "SyntaxError";
  return self;
}

peg$subclass(peg$SyntaxError, Error);

function peg$padEnd(str, targetLength, padString) {
  padString = padString || " ";
  if (str.length > targetLength) { return str; }
  targetLength -= str.length;
  padString += padString.repeat(targetLength);
  return str + padString.slice(0, targetLength);
}

peg$SyntaxError.prototype.format = function(sources) {
  var str = "Error: " + this.message;
  if (this.location) {
    var src = null;
    var st = this.location.start;
    var k;
    for (k = 0; k < sources.length; k++) {
      if (sources[k].source === this.location.source) {
        src = sources[k].text.split(/\r\n|\n|\r/g);
        break;
      }
    }
    var loc = this.location.source + ":" + st.line + ":" + st.column;
    if (src) {
      var e = this.location.end;
      var filler = peg$padEnd("", st.line.toString().length, " ");
      var line = src[st.line - 1];
      var last = st.line === e.line ? e.column : line.length + 1;
      var hatLen = (last - st.column) || 1;
      str += "\n --> " + loc + "\n"
          + filler + " |\n"
          + st.line + " | " + line + "\n"
          + filler + " | " + peg$padEnd("", st.column - 1, " ")
          + peg$padEnd("", hatLen, "^");
    } else {
      str += "\n at " + loc;
    }
  }
  return str;
};

peg$SyntaxError.buildMessage = function(expected, found) {
  var DESCRIBE_EXPECTATION_FNS = {
    literal: function(expectation) {
      return "\"" + literalEscape(expectation.text) + "\"";
    },

    class: function(expectation) {
      var escapedParts = expectation.parts.map(function(part) {
        return Array.isArray(part)
          ? classEscape(part[0]) + "-" + classEscape(part[1])
          : classEscape(part);
      });
      return "[" + (expectation.inverted ? "^" : "") + escapedParts.join("") + "]";
    },

    any: function() {
      return "any character";
    },

    end: function() {
      return "end of input";
    },

    other: function(expectation) {
      return expectation.description;
    }
  };

  function hex(ch) {
    return ch.charCodeAt(0).toString(16).toUpperCase();
  }

  function literalEscape(s) {
    return s
      .replace(/\\/g, "\\\\")
      .replace(/"/g, "\\\"")
      .replace(/\0/g, "\\0")
      .replace(/\t/g, "\\t")
      .replace(/\n/g, "\\n")
      .replace(/\r/g, "\\r")
      .replace(/[\x00-\x0F]/g, function(ch) { return "\\x0" + hex(ch); })
      .replace(/[\x10-\x1F\x7F-\x9F]/g, function(ch) { return "\\x" + hex(ch); });
  }

  function classEscape(s) {
    return s
      .replace(/\\/g, "\\\\")
      .replace(/\]/g, "\\]")
      .replace(/\^/g, "\\^")
      .replace(/-/g, "\\-")
      .replace(/\0/g, "\\0")
      .replace(/\t/g, "\\t")
      .replace(/\n/g, "\\n")
      .replace(/\r/g, "\\r")
      .replace(/[\x00-\x0F]/g, function(ch) { return "\\x0" + hex(ch); })
      .replace(/[\x10-\x1F\x7F-\x9F]/g, function(ch) { return "\\x" + hex(ch); });
  }

  function describeExpectation(expectation) {
    return DESCRIBE_EXPECTATION_FNS[expectation.type](expectation);
  }

  function describeExpected(expected1) {
    var descriptions = expected1.map(describeExpectation);
    var i, j;

    descriptions.sort();

    if (descriptions.length > 0) {
      for (i = 1, j = 1; i < descriptions.length; i++) {
        if (descriptions[i - 1] !== descriptions[i]) {
          descriptions[j] = descriptions[i];
          j++;
        }
      }
      descriptions.length = j;
    }

    switch (descriptions.length) {
      case 1:
        return descriptions[0];

      case 2:
        return descriptions[0] + " or " + descriptions[1];

      default:
        return descriptions.slice(0, -1).join(", ")
          + " or "
          + descriptions[descriptions.length - 1];
    }
  }

  function describeFound(found1) {
    return found1 ? "\"" + literalEscape(found1) + "\"" : "end of input";
  }

  return "Expected " + describeExpected(expected) + " but " + describeFound(found) + " found.";
};"#;

/// The default tracer, emitted only for tracing parsers
pub(crate) const DEFAULT_TRACER: &str = r#"function peg$DefaultTracer() {
  this.indentLevel = 0;
}

peg$DefaultTracer.prototype.trace = function(event) {
  var that = this;

  function log(evt) {
    function repeat(string, n) {
      var result = "";
      while (n-- > 0) { result += string; }
      return result;
    }

    function pad(string, length) {
      return string + repeat(" ", length - string.length);
    }

    if (typeof console === "object") {
      console.log(
        evt.location.start.line + ":" + evt.location.start.column + "-"
          + evt.location.end.line + ":" + evt.location.end.column + " "
          + pad(evt.type, 10) + " "
          + repeat("  ", that.indentLevel) + evt.rule
      );
    }
  }

  switch (event.type) {
    case "rule.enter":
      log(event);
      this.indentLevel++;
      break;

    case "rule.match":
      this.indentLevel--;
      log(event);
      break;

    case "rule.fail":
      this.indentLevel--;
      log(event);
      break;

    default:
      throw new Error("Invalid event type: " + event.type + ".");
  }
};"#;

/// Per-parse helper functions, emitted inside `peg$parse`
pub(crate) const PARSE_HELPERS: &str = r#"function text() {
  return input.substring(peg$savedPos, peg$currPos);
}

function offset() {
  return peg$savedPos;
}

function range() {
  return {
    source: peg$source,
    start: peg$savedPos,
    end: peg$currPos
  };
}

function location() {
  return peg$computeLocation(peg$savedPos, peg$currPos);
}

function expected(description, location1) {
  location1 = location1 !== undefined
    ? location1
    : peg$computeLocation(peg$savedPos, peg$currPos);

  throw peg$buildStructuredError(
    [peg$otherExpectation(description)],
    input.substring(peg$savedPos, peg$currPos),
    location1
  );
}

function error(message, location1) {
  location1 = location1 !== undefined
    ? location1
    : peg$computeLocation(peg$savedPos, peg$currPos);

  throw peg$buildSimpleError(message, location1);
}

function peg$literalExpectation(text1, ignoreCase) {
  return { type: "literal", text: text1, ignoreCase: ignoreCase };
}

function peg$classExpectation(parts, inverted, ignoreCase) {
  return { type: "class", parts: parts, inverted: inverted, ignoreCase: ignoreCase };
}

function peg$anyExpectation() {
  return { type: "any" };
}

function peg$endExpectation() {
  return { type: "end" };
}

function peg$otherExpectation(description) {
  return { type: "other", description: description };
}

function peg$computePosDetails(pos) {
  var details = peg$posDetailsCache[pos];
  var p;

  if (details) {
    return details;
  }

  p = pos - 1;
  while (!peg$posDetailsCache[p]) { p--; }

  details = peg$posDetailsCache[p];
  details = {
    line: details.line,
    column: details.column
  };

  while (p < pos) {
    if (input.charCodeAt(p) === 10) {
      details.line++;
      details.column = 1;
    } else {
      details.column++;
    }
    p++;
  }

  peg$posDetailsCache[pos] = details;

  return details;
}

function peg$computeLocation(startPos, endPos) {
  var startPosDetails = peg$computePosDetails(startPos);
  var endPosDetails = peg$computePosDetails(endPos);

  return {
    source: peg$source,
    start: {
      offset: startPos,
      line: startPosDetails.line,
      column: startPosDetails.column
    },
    end: {
      offset: endPos,
      line: endPosDetails.line,
      column: endPosDetails.column
    }
  };
}

function peg$fail(expected1) {
  if (peg$silentFails > 0) { return; }
  if (peg$currPos < peg$maxFailPos) { return; }

  if (peg$currPos > peg$maxFailPos) {
    peg$maxFailPos = peg$currPos;
    peg$maxFailExpected = [];
  }

  peg$maxFailExpected.push(expected1);
}

function peg$buildSimpleError(message, location1) {
  return new peg$SyntaxError(message, null, null, location1);
}

function peg$buildStructuredError(expected1, found, location1) {
  return new peg$SyntaxError(
    peg$SyntaxError.buildMessage(expected1, found),
    expected1,
    found,
    location1
  );
}

function peg$parseLibrary(library, ruleName) {
  var outcome = library.parse(input.substring(peg$currPos), {
    startRule: ruleName,
    peg$library: true
  });
  if (outcome.result === undefined) {
    return peg$FAILED;
  }
  peg$currPos += outcome.currPos;
  return outcome.result;
}"#;

/// The driver running after the start rule returned, shared by the plain
/// and the library entry paths
pub(crate) const PARSE_FOOTER: &str = r#"peg$result = peg$startRuleFunction();

if (options.peg$library) {
  return {
    result: peg$result === peg$FAILED ? undefined : peg$result,
    currPos: peg$currPos,
    success: peg$result !== peg$FAILED && peg$currPos === input.length,
    maxFailExpected: peg$maxFailExpected,
    maxFailPos: peg$maxFailPos,
    throw: function() {
      throw peg$buildStructuredError(
        peg$maxFailExpected,
        peg$maxFailPos < input.length ? input.charAt(peg$maxFailPos) : null,
        peg$maxFailPos < input.length
          ? peg$computeLocation(peg$maxFailPos, peg$maxFailPos + 1)
          : peg$computeLocation(peg$maxFailPos, peg$maxFailPos)
      );
    }
  };
}

if (peg$result !== peg$FAILED && peg$currPos === input.length) {
  return peg$result;
}

if (peg$result !== peg$FAILED && peg$currPos < input.length) {
  peg$fail(peg$endExpectation());
}

throw peg$buildStructuredError(
  peg$maxFailExpected,
  peg$maxFailPos < input.length ? input.charAt(peg$maxFailPos) : null,
  peg$maxFailPos < input.length
    ? peg$computeLocation(peg$maxFailPos, peg$maxFailPos + 1)
    : peg$computeLocation(peg$maxFailPos, peg$maxFailPos)
);"#;
